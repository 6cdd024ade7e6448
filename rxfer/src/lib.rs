//! Remote transfer tool - `rxfer`
//!
//! `rxfer` moves directory trees between the local machine and remote endpoints over SFTP and
//! runs commands on those endpoints over SSH. It is meant to be driven by migration scripts: every
//! operation either completes or fails with the first error it encountered, and a summary of what
//! was transferred is always available.
//!
//! # Endpoints
//!
//! Two endpoint roles exist and each gets its own connection:
//!
//! - **source**: directories are downloaded from it
//! - **target**: directories and single files are uploaded to it
//!
//! Commands may run on either endpoint.
//!
//! # Examples
//!
//! ```bash
//! # Download /var/lib/app from the old host into ./app-data
//! rxfer --source-host old.example.com --source-user root --source-password ... \
//!     download /var/lib/app ./app-data --summary
//!
//! # Upload it to the new host
//! rxfer --target-host new.example.com --target-user root --target-key ~/.ssh/id_ed25519 \
//!     upload ./app-data /var/lib/app
//!
//! # Dump a database running on the old host into a local file
//! rxfer --source-host old.example.com --source-user root --source-password ... \
//!     dump "pg_dump -U app app" ./dumps/app.sql
//! ```
//!
//! Every option can also be set through an `RXFER_*` environment variable, e.g.
//! `RXFER_SOURCE_PASSWORD`.
//!
//! # Transfer Semantics
//!
//! Downloads walk the remote tree one directory at a time, depth first, and queue each file on
//! a [`throttle::WorkQueue`] so that at most `--concurrency` files are in flight. Uploads walk
//! the local tree in name order and send one file at a time. In both directions a failing
//! listing only skips its own subtree and a failing file only skips itself; the outcome is
//! reported as a [`Completion`].
//!
//! There are no retries, no resume of partial transfers and no checksums beyond what the
//! transport provides.

pub mod summary;
pub mod transfer;

#[cfg(test)]
mod testutils;

pub use summary::{Completion, Summary};
pub use transfer::{DOWNLOAD_PRIORITY, FileTransfer};
