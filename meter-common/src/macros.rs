/// Implements `Serialize` and `Deserialize` through a type's string representation.
///
/// The type must implement `Display` and `FromStr`. Deserialization reports the given expectation
/// when the string does not parse.
///
/// ```
/// use std::fmt;
/// use std::str::FromStr;
///
/// #[derive(Debug, PartialEq)]
/// struct Port(u16);
///
/// impl fmt::Display for Port {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         write!(f, ":{}", self.0)
///     }
/// }
///
/// impl FromStr for Port {
///     type Err = ();
///
///     fn from_str(s: &str) -> Result<Self, ()> {
///         s.strip_prefix(':').and_then(|p| p.parse().ok()).map(Port).ok_or(())
///     }
/// }
///
/// meter_common::impl_str_serde!(Port, "a port prefixed with a colon");
/// ```
#[macro_export]
macro_rules! impl_str_serde {
    ($type:ty, $expectation:expr) => {
        impl ::serde::Serialize for $type {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $type {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                let value =
                    <::std::borrow::Cow<'de, str> as ::serde::Deserialize>::deserialize(deserializer)?;
                value.parse().map_err(|_| {
                    <D::Error as ::serde::de::Error>::invalid_value(
                        ::serde::de::Unexpected::Str(&value),
                        &$expectation,
                    )
                })
            }
        }
    };
}
