//! Document serializers.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Marshals documents to and from bytes.
///
/// Serializers are opaque to the session: it only requires that
/// `deserialize(serialize(doc))` yields a structurally equivalent document.
///
/// # Example
///
/// ```rust
/// use jsondoc_core::{JsonSerializer, Serializer};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Foo {
///     bar: String,
/// }
///
/// let serializer = JsonSerializer::<Foo>::new();
/// let bytes = serializer.serialize(&Foo { bar: "one".into() }).unwrap();
/// assert_eq!(bytes, br#"{"bar":"one"}"#);
/// assert_eq!(serializer.deserialize(&bytes).unwrap(), Foo { bar: "one".into() });
/// ```
pub trait Serializer: Send + Sync {
    /// The document type this serializer handles.
    type Document;

    /// Encodes a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be represented.
    fn serialize(&self, document: &Self::Document) -> Result<Vec<u8>, CodecError>;

    /// Decodes a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    fn deserialize(&self, data: &[u8]) -> Result<Self::Document, CodecError>;
}

/// JSON serializer for any serde type.
///
/// Use [`serde_json::Value`] as the document type to store heterogeneous
/// documents in one session.
pub struct JsonSerializer<T> {
    pretty: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Creates a serializer producing compact JSON.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pretty: false,
            _marker: PhantomData,
        }
    }

    /// Creates a serializer producing indented JSON.
    #[must_use]
    pub const fn pretty() -> Self {
        Self {
            pretty: true,
            _marker: PhantomData,
        }
    }

    /// Returns true if output is indented.
    #[must_use]
    pub const fn is_pretty(&self) -> bool {
        self.pretty
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerializer<T> {
    fn clone(&self) -> Self {
        Self {
            pretty: self.pretty,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonSerializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSerializer")
            .field("pretty", &self.pretty)
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> Serializer for JsonSerializer<T> {
    type Document = T;

    fn serialize(&self, document: &T) -> Result<Vec<u8>, CodecError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(document)?
        } else {
            serde_json::to_vec(document)?
        };
        Ok(bytes)
    }

    fn deserialize(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// CBOR serializer for any serde type.
#[cfg(feature = "cbor")]
pub struct CborSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

#[cfg(feature = "cbor")]
impl<T> CborSerializer<T> {
    /// Creates a CBOR serializer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

#[cfg(feature = "cbor")]
impl<T> Default for CborSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cbor")]
impl<T> fmt::Debug for CborSerializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CborSerializer")
    }
}

#[cfg(feature = "cbor")]
impl<T: Serialize + DeserializeOwned> Serializer for CborSerializer<T> {
    type Document = T;

    fn serialize(&self, document: &T) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(document, &mut bytes)?;
        Ok(bytes)
    }

    fn deserialize(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(ciborium::from_reader(data)?)
    }
}
