//! Opaque references to objects living inside the engine.

use std::fmt;

use crate::traits::SessionId;

/// Engine-side object identifier. Only meaningful to the session that issued it.
pub type ObjectId = u64;

/// Non-owning reference to a remote object.
///
/// A handle carries no remote state. Printing it yields an opaque token; the
/// object's fields can only be reached by passing the handle back into the
/// session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteHandle {
    session: SessionId,
    object: ObjectId,
    class_name: String,
}

impl RemoteHandle {
    /// Create a handle for `object` issued by `session`.
    #[must_use]
    pub fn new(session: SessionId, object: ObjectId, class_name: impl Into<String>) -> Self {
        Self {
            session,
            object,
            class_name: class_name.into(),
        }
    }

    /// Session that issued this handle.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Engine-side object id.
    #[must_use]
    pub const fn object_id(&self) -> ObjectId {
        self.object
    }

    /// Engine class name reported when the handle was issued.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Whether this handle may be used with `session`.
    #[must_use]
    pub fn belongs_to(&self, session: SessionId) -> bool {
        self.session == session
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session.simple().to_string();
        write!(
            f,
            "<engine.object {} #{} at session {}>",
            self.class_name,
            self.object,
            &session[..8]
        )
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn display_is_opaque() {
        let session = Uuid::new_v4();
        let handle = RemoteHandle::new(session, 7, "Netabolics.Biology.Model");
        let shown = handle.to_string();

        assert!(shown.starts_with("<engine.object Netabolics.Biology.Model #7 at session "));
        assert!(shown.ends_with('>'));
        assert!(shown.contains(&session.simple().to_string()[..8]));
    }

    #[test]
    fn ownership_is_by_session() {
        let owner = Uuid::new_v4();
        let handle = RemoteHandle::new(owner, 1, "struct");
        assert!(handle.belongs_to(owner));
        assert!(!handle.belongs_to(Uuid::new_v4()));
    }
}
