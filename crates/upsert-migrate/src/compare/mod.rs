//! Schema and data comparison between two databases.

mod data;
mod key;
mod normalize;
mod schema;

pub use data::{
    DataComparator, DataCompareOptions, DataDiff, DataDiffResult, DataDiffRow, RowStatus,
};
pub use key::{KeyError, RowKey};
pub use normalize::{parse_timestamp, values_equal};
pub use schema::{
    compare_schema, normalize_default, ChangeDetail, ChangeType, DiffSummary, ObjectType,
    ProposedType, SchemaChange, SchemaComparator, SchemaDiffResult,
};
