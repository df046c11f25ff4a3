mod type_name;

pub use type_name::{current_timestamp_ms, short_type_name, short_type_name_of, AsAny};
