//! Access guard.
//!
//! Only two things decide read access: the identity's `public` flag, and
//! whether the viewer owns it. Stars and fork lineage play no part. The
//! guard runs before the result cache is consulted, on every read path.

use crate::error::{ErrorKind, Result};
use sqlhub_metadata::Identity;

/// Who is asking. `None` is an anonymous viewer.
pub type Viewer<'a> = Option<&'a str>;

/// Whether `viewer` may read any version of `identity`.
pub fn can_read(viewer: Viewer<'_>, identity: &Identity) -> bool {
    viewer == Some(identity.key.owner.as_str()) || identity.public
}

/// Whether `viewer` may change the identity's settings.
pub fn can_write(viewer: &str, identity: &Identity) -> bool {
    viewer == identity.key.owner
}

/// Turn a metadata lookup into an authorized identity.
pub(crate) fn authorize(viewer: Viewer<'_>, what: &str, identity: Option<Identity>) -> Result<Identity> {
    let Some(identity) = identity else {
        exn::bail!(ErrorKind::NotFound(what.to_string()));
    };
    if !can_read(viewer, &identity) {
        tracing::debug!(viewer = viewer.unwrap_or("<anonymous>"), identity = %identity.key, "read denied");
        exn::bail!(ErrorKind::Forbidden);
    }
    Ok(identity)
}
