//! Per-call request context.
//!
//! Every dispatched action receives a [`Context`] naming the transport the
//! call arrived on and carrying the request-scoped database session. The
//! transport is explicit call state, never ambient: the same resource
//! method can serve both protocols and still branch when it has to.

use crate::model::Session;

/// The transport a call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Http,
    Rpc,
}

/// Per-call state handed to every action.
#[derive(Clone)]
pub struct Context {
    /// Which transport dispatched this call.
    pub transport: Transport,
    /// Request-scoped database session, released exactly once after the
    /// action returns.
    pub session: Session,
}

impl Context {
    pub fn new(transport: Transport, session: Session) -> Self {
        Self { transport, session }
    }

    pub fn is_rpc(&self) -> bool {
        self.transport == Transport::Rpc
    }

    pub fn is_http(&self) -> bool {
        self.transport == Transport::Http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_flags() {
        let cx = Context::new(Transport::Rpc, Session::null());
        assert!(cx.is_rpc());
        assert!(!cx.is_http());

        let cx = Context::new(Transport::Http, Session::null());
        assert!(cx.is_http());
    }
}
