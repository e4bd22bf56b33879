//! Versioned storage for SQLite database files.
//!
//! Ties the blob store, the metadata store and the result cache together
//! behind [`Hub`]:
//!
//! - **Uploads** are checked, digested, written under a freshly reserved
//!   object id in the owner's bucket, and recorded as the identity's next
//!   version in one metadata transaction.
//! - **Forks** copy a version's bytes into the forking owner's bucket. The
//!   fork never shares a blob with its source.
//! - **Reads** pass the [access guard](access) first and only then consult the
//!   result cache; a miss reads the blob and fills the cache.
//! - **Mutations** invalidate every cached view of the identity they touch.

pub mod access;
mod digest;
pub mod error;
mod hub;
mod ident;
mod models;
pub mod table;
pub mod validate;

pub use crate::digest::digest;
pub use crate::hub::Hub;
pub use crate::ident::bucket_for;
pub use crate::models::{DEFAULT_CONTENT_TYPE, Forked, TableRequest, TableView, Upload};
pub use sqlhub_metadata::{BlobRef, Identity, IdentityKey, Settings, VersionRecord};
