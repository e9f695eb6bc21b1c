//! `kvdb-cli` is a small command-line front end over [`kvdb`]'s control
//! plane, backed by the in-memory reference collaborators in
//! [`kvdb::mem`]. It exists to exercise the facade end to end from a
//! terminal, not as a production database client.
//!
//! ## Getting started
//!
//! ```doc
//! ❯ kvdb-cli kvs-create orders
//! ❯ kvdb-cli put orders order-1 placed
//! ❯ kvdb-cli get orders order-1
//! placed
//! ❯ kvdb-cli scan orders
//! order-1 = placed
//! ```

pub mod session;
pub mod trace;
