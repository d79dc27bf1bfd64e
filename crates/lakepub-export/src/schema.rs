//! Arrow schema of the expense artifact

use std::sync::{Arc, LazyLock};

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};

/// Time zone stamped on timestamp columns
pub const TIMESTAMP_TZ: &str = "UTC";

/// Expense artifact schema. Column order and nullability are fixed.
pub static EXPENSES: LazyLock<Arc<Schema>> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("comment", DataType::Utf8, true),
        Field::new("startDate", timestamp(), false),
        Field::new("endDate", timestamp(), true),
        Field::new("status", DataType::Utf8, false),
        Field::new("attachment", DataType::Utf8, true),
        Field::new("exported", DataType::Boolean, false),
    ]))
});

fn timestamp() -> DataType {
    DataType::Timestamp(TimeUnit::Millisecond, Some(TIMESTAMP_TZ.into()))
}

pub fn expenses() -> &'static Arc<Schema> {
    &EXPENSES
}
