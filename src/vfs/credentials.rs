//! Composite login identity: `<access key>/<container>` with the password as secret.

use crate::storage::{Credentials, StoreBox, StoreFactory};

use super::error::{VfsError, VfsResult};

/// Separator between access key and container in the login name / 登录名分隔符
pub const IDENTITY_DELIMITER: char = '/';

/// Split `identity` into access key and container / 解析登录身份
///
/// Exactly one delimiter with non-empty parts on both sides is accepted.
pub fn parse_identity(identity: &str, secret: &str) -> VfsResult<Credentials> {
    let parts: Vec<&str> = identity.split(IDENTITY_DELIMITER).collect();
    match parts.as_slice() {
        [access_key, container] if !access_key.is_empty() && !container.is_empty() => {
            Ok(Credentials {
                access_key: access_key.to_string(),
                secret_key: secret.to_string(),
                container: container.to_string(),
            })
        }
        _ => Err(VfsError::AuthenticationFailure(format!(
            "identity must look like <access key>{}<container>",
            IDENTITY_DELIMITER
        ))),
    }
}

/// Parse the identity, build a store client for it and probe the container.
/// The probe result is the only authentication signal / 绑定凭证并探活
pub async fn bind(
    factory: &dyn StoreFactory,
    identity: &str,
    secret: &str,
) -> VfsResult<(Credentials, StoreBox)> {
    let credentials = parse_identity(identity, secret)?;

    let store = factory
        .connect(&credentials)
        .map_err(|e| VfsError::AuthenticationFailure(e.to_string()))?;

    store
        .head_container(&credentials.container)
        .await
        .map_err(|e| VfsError::AuthenticationFailure(e.to_string()))?;

    tracing::debug!(
        "Credentials bound: access_key={}, container={}, backend={}",
        credentials.access_key,
        credentials.container,
        store.name()
    );
    Ok((credentials, store))
}
