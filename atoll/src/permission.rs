//! Permission checks applied before every dispatched action.
//!
//! A resource declares a list of permission objects; every one must pass
//! on every call, HTTP and gRPC alike. A failing check stops dispatch with
//! the canonical `FORBIDDEN` / `Permission Denied` error before the action
//! body or any store verb runs.

use crate::context::Context;
use crate::error::{ApiError, ApiResult};

/// One gate in front of a resource's actions.
pub trait Permission: Send + Sync + 'static {
    /// Return `true` to let the call through.
    fn check(&self, cx: &Context) -> bool;
}

/// Lets every call through. The implicit default for resources that
/// declare no permissions.
pub struct AllowAny;

impl Permission for AllowAny {
    fn check(&self, _cx: &Context) -> bool {
        true
    }
}

/// Only lets gRPC calls through; internal-only resources use this to stay
/// off the public HTTP surface while keeping the routes mounted.
pub struct RpcOnly;

impl Permission for RpcOnly {
    fn check(&self, cx: &Context) -> bool {
        cx.is_rpc()
    }
}

/// Run every declared permission; the first failure rejects the call.
pub fn check_permissions(
    permissions: &[std::sync::Arc<dyn Permission>],
    cx: &Context,
) -> ApiResult<()> {
    for permission in permissions {
        if !permission.check(cx) {
            return Err(ApiError::permission_denied());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Transport;
    use crate::model::Session;
    use std::sync::Arc;

    #[test]
    fn empty_permission_list_allows() {
        let cx = Context::new(Transport::Http, Session::null());
        assert!(check_permissions(&[], &cx).is_ok());
    }

    #[test]
    fn rpc_only_rejects_http() {
        let perms: Vec<Arc<dyn Permission>> = vec![Arc::new(RpcOnly)];
        let http = Context::new(Transport::Http, Session::null());
        let rpc = Context::new(Transport::Rpc, Session::null());
        let err = check_permissions(&perms, &http).unwrap_err();
        assert_eq!(err.message, "Permission Denied");
        assert!(check_permissions(&perms, &rpc).is_ok());
    }
}
