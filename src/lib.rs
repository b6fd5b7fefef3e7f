//! Object-relational persistence core.
//!
//! This crate is the load/save/delete engine underneath a larger
//! persistence layer: a [`registry::Registry`] describes the application's
//! entity types, a [`schema_binder::SchemaBinder`] checks that description
//! against a live database schema, and [`loader::Loader`]/[`saver::Saver`]/
//! [`deleter::Deleter`]/[`exclusive_allocator::ExclusiveAllocator`] move
//! objects between the in-memory [`object_store::ObjectStore`] and
//! whatever [`db::ConnectionPool`] a caller supplies. [`controller`] wires
//! all of that into one owned, shareable instance.
//!
//! Concrete DDL generation and a live `sqlx`/database wire adapter are
//! out of scope here; [`db::ConnectionPool`] and [`schema_binder::SchemaIntrospector`]
//! are the seams a caller implements against a real database.

pub mod config;
pub mod controller;
pub mod crypto;
pub mod db;
pub mod deleter;
pub mod dialect;
pub mod error;
pub mod exclusive_allocator;
pub mod id_generator;
pub mod loader;
pub mod object;
pub mod object_store;
pub mod ordering;
pub mod record_cache;
pub mod registry;
pub mod saver;
pub mod schema_binder;
pub mod value;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use controller::PersistenceController;
pub use error::{PersistError, Result};
pub use object::Object;
pub use object_store::{ObjectStore, SharedObject};
pub use registry::Registry;
