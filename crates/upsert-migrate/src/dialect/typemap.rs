//! Engine-keyed entry points into the canonical type system.
//!
//! Each engine has one converter implementing both [`ToCanonical`] and
//! [`FromCanonical`]; these functions pick the right one. Everything here is
//! pure: warnings are returned, never logged.

use std::sync::Arc;

use crate::core::engine::DatabaseEngine;

use super::canonical::{
    CanonicalTypeInfo, CanonicalType, ComposedMapper, FromCanonical, ToCanonical, TypeMapping,
};
use super::document::{CosmosTypes, MongoTypes};
use super::mssql::MssqlTypes;
use super::mysql::MysqlTypes;
use super::native::NativeTypeSpec;
use super::oracle::OracleTypes;
use super::postgres::PostgresTypes;
use super::sqlite::SqliteTypes;

/// Native → canonical converter for an engine.
pub fn to_canonical_converter(engine: DatabaseEngine) -> Arc<dyn ToCanonical> {
    match engine {
        DatabaseEngine::SqlServer => Arc::new(MssqlTypes),
        DatabaseEngine::PostgreSql => Arc::new(PostgresTypes),
        DatabaseEngine::MySql => Arc::new(MysqlTypes),
        DatabaseEngine::Sqlite => Arc::new(SqliteTypes),
        DatabaseEngine::Oracle => Arc::new(OracleTypes),
        DatabaseEngine::MongoDb => Arc::new(MongoTypes),
        DatabaseEngine::CosmosDb => Arc::new(CosmosTypes),
    }
}

/// Canonical → native converter for an engine.
pub fn from_canonical_converter(engine: DatabaseEngine) -> Arc<dyn FromCanonical> {
    match engine {
        DatabaseEngine::SqlServer => Arc::new(MssqlTypes),
        DatabaseEngine::PostgreSql => Arc::new(PostgresTypes),
        DatabaseEngine::MySql => Arc::new(MysqlTypes),
        DatabaseEngine::Sqlite => Arc::new(SqliteTypes),
        DatabaseEngine::Oracle => Arc::new(OracleTypes),
        DatabaseEngine::MongoDb => Arc::new(MongoTypes),
        DatabaseEngine::CosmosDb => Arc::new(CosmosTypes),
    }
}

/// Translate a native type of `engine` into canonical form.
///
/// Unknown types come back as [`CanonicalType::Unsupported`] with
/// `Lossiness::Unsupported`.
pub fn to_canonical(engine: DatabaseEngine, spec: &NativeTypeSpec) -> CanonicalTypeInfo {
    to_canonical_converter(engine).to_canonical(spec)
}

/// Pick the native type of `engine` that best preserves `canonical`.
pub fn from_canonical(canonical: &CanonicalType, engine: DatabaseEngine) -> TypeMapping {
    from_canonical_converter(engine).from_canonical(canonical)
}

/// Resolve aliases and default arguments for a native type of `engine`.
pub fn normalize_native(engine: DatabaseEngine, spec: &NativeTypeSpec) -> NativeTypeSpec {
    to_canonical_converter(engine).normalize(spec)
}

/// Composed native → native mapper between two engines.
pub fn mapper(source: DatabaseEngine, target: DatabaseEngine) -> ComposedMapper {
    ComposedMapper::new(
        to_canonical_converter(source),
        from_canonical_converter(target),
    )
}

/// Map a native type string from one engine to another.
pub fn map_type(source: DatabaseEngine, target: DatabaseEngine, native: &str) -> TypeMapping {
    mapper(source, target).map_type_str(native)
}
