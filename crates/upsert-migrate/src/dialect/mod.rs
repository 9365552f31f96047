//! Canonical type mapping for the seven supported engines.
//!
//! Native types are translated through an engine-neutral [`CanonicalType`].
//! Every conversion is tagged with a [`Lossiness`] so callers can decide
//! whether to proceed, warn, or skip a column.
//!
//! ```rust
//! use upsert_migrate::core::DatabaseEngine;
//! use upsert_migrate::dialect::{map_type, Lossiness};
//!
//! let mapping = map_type(DatabaseEngine::SqlServer, DatabaseEngine::PostgreSql, "datetimeoffset");
//! assert_eq!(mapping.target_type.to_string(), "TIMESTAMPTZ");
//! assert_eq!(mapping.lossiness, Lossiness::Exact);
//! ```

mod canonical;
mod document;
mod mssql;
mod mysql;
mod native;
mod oracle;
mod postgres;
mod sqlite;
mod typemap;

pub use canonical::{
    CanonicalType, CanonicalTypeInfo, ComposedMapper, FromCanonical, Lossiness, ToCanonical,
    TypeMapping,
};
pub use document::{CosmosTypes, MongoTypes};
pub use mssql::MssqlTypes;
pub use mysql::MysqlTypes;
pub use native::NativeTypeSpec;
pub use oracle::OracleTypes;
pub use postgres::PostgresTypes;
pub use sqlite::SqliteTypes;
pub use typemap::{
    from_canonical, from_canonical_converter, map_type, mapper, normalize_native, to_canonical,
    to_canonical_converter,
};
