//! Layering per-name overrides onto a global template.
//!
//! Config structs taking part in merging keep every field as an `Option`, so
//! "explicitly set" and "inherit" stay distinguishable after deserialization.
//! [`impl_merge!`](crate::impl_merge) writes the field-by-field body.

/// Field-wise layering of two configs.
pub trait Merge: Clone {
    /// Return a new value where every field set in `over` wins and every
    /// unset field is inherited from `self`.
    fn merge(&self, over: &Self) -> Self;
}

/// A mergeable config that carries the resource name.
pub trait NamedConfig: Merge {
    /// The configured name, if any
    fn name(&self) -> Option<&str>;

    /// Replace the name
    fn set_name(&mut self, name: String);
}

/// Pick the override value when present, the template value otherwise.
#[must_use]
pub fn pick<T: Clone>(global: &Option<T>, over: &Option<T>) -> Option<T> {
    over.as_ref().or(global.as_ref()).cloned()
}

/// Merge `over` onto `global` and name the result.
///
/// The name is never inherited from the template (every entry would share
/// it): it comes from `over` or, when unset or blank there, from `key`.
pub fn effective<C: NamedConfig>(key: &str, global: &C, over: &C) -> C {
    let mut merged = global.merge(over);
    let name = over
        .name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(key)
        .to_owned();
    merged.set_name(name);
    merged
}

/// Implement [`Merge`] for a struct whose listed fields are all `Option`s.
///
/// ```
/// use hinny_config::{impl_merge, merge::Merge};
///
/// #[derive(Clone, Default)]
/// struct Conn {
///     url: Option<String>,
///     timeout_ms: Option<u64>,
/// }
/// impl_merge!(Conn { url, timeout_ms });
///
/// let global = Conn { url: Some("db://a".into()), timeout_ms: Some(500) };
/// let over = Conn { timeout_ms: Some(50), ..Default::default() };
/// let merged = global.merge(&over);
/// assert_eq!(merged.url.as_deref(), Some("db://a"));
/// assert_eq!(merged.timeout_ms, Some(50));
/// ```
#[macro_export]
macro_rules! impl_merge {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::merge::Merge for $ty {
            fn merge(&self, over: &Self) -> Self {
                Self {
                    $( $field: $crate::merge::pick(&self.$field, &over.$field), )+
                }
            }
        }
    };
}
