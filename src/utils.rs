//! Path processing utility functions / 路径处理工具函数
//!
//! Store keys never start with `/`; a directory prefix always ends with `/`, and the
//! container root is the empty string.

/// Store path separator / 存储路径分隔符
pub const SEPARATOR: char = '/';

/// Clean path, handle ., .. and duplicate / / 清理路径，处理 . 和 .. 和重复的 /
fn clean_segments(path: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    parts
}

/// Resolve a user path against the working directory into a bare key
/// (no leading or trailing separator) / 将用户路径解析为对象键
/// 1. Replace backslashes with forward slashes / 将反斜杠替换为正斜杠
/// 2. Absolute paths start from the container root, relative ones from `cwd`
/// 3. Clean . and .. in path / 清理路径中的 . 和 ..
pub fn resolve_key(cwd: &str, path: &str) -> String {
    let path = path.replace('\\', "/");
    let joined = if path.starts_with(SEPARATOR) || cwd.is_empty() {
        path
    } else {
        format!("{}/{}", cwd.trim_end_matches(SEPARATOR), path)
    };

    clean_segments(&joined).join("/")
}

/// Directory prefix form of a bare key: `a/b` -> `a/b/`, root stays empty / 目录前缀
pub fn dir_prefix(key: &str) -> String {
    let key = key.trim_matches(SEPARATOR);
    if key.is_empty() {
        String::new()
    } else {
        format!("{}/", key)
    }
}

/// Resolve a path into a directory prefix / 解析为目录前缀
pub fn resolve_dir_prefix(cwd: &str, path: &str) -> String {
    dir_prefix(&resolve_key(cwd, path))
}

/// Resolve a path into an object key, keeping a trailing separator so that
/// `foo/` still names the directory marker object / 解析为对象键（保留末尾分隔符）
pub fn resolve_object_key(cwd: &str, path: &str) -> String {
    let key = resolve_key(cwd, path);
    if !key.is_empty() && (path.ends_with('/') || path.ends_with('\\')) {
        format!("{}/", key)
    } else {
        key
    }
}

/// Last segment of a key or prefix / 获取最后一段名称
pub fn base_name(key: &str) -> &str {
    key.trim_end_matches(SEPARATOR)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or("")
}

/// MIME type from the file extension, `application/octet-stream` when unknown / 内容类型
pub fn content_type_for(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
