/// Declare a scalar field whose column is named after the field.
///
/// ```ignore
/// field!(s, id).primary_key().auto_increment();
/// field!(s, display_name).column_name("displayName");
/// ```
#[macro_export]
macro_rules! field {
    ($schema:expr, $field:ident) => {
        $schema.field(stringify!($field), |e| &e.$field, |e| &mut e.$field)
    };
}
