mod versioned_schema;

pub use versioned_schema::{Column, ForeignKey, Schema, SqlType, Table, BASE_DB_VERSION};
