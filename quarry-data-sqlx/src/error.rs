use quarry_data::StorageError;

/// Extension trait for converting `sqlx::Error` into `StorageError`.
///
/// The orphan rule keeps `From<sqlx::Error> for StorageError` out of this
/// crate, so call `.into_storage_error()` at the boundary instead.
pub trait SqlxErrorExt {
    fn into_storage_error(self) -> StorageError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_storage_error(self) -> StorageError {
        match &self {
            sqlx::Error::RowNotFound => StorageError::Query("Row not found".into()),
            sqlx::Error::ColumnNotFound(name) => {
                StorageError::Query(format!("Column '{name}' not found"))
            }
            _ => StorageError::Database(Box::new(self)),
        }
    }
}
