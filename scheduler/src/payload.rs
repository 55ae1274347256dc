//! A thin, cloneable wrapper around the bytes returned by a completed fetch.
//!
//! This is the `Payload` the spec's `request_fn` resolves to. It carries no
//! tile-format knowledge of its own; parsing is an external collaborator's
//! job (see the crate-level docs).

use std::fmt;

/// An owned, immutable byte buffer handed from a completed [`Request`](crate::request::Request)
/// to its waiter.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
	/// Creates an empty payload.
	///
	/// # Examples
	///
	/// ```rust
	/// use tilestream_scheduler::Payload;
	///
	/// let payload = Payload::new_empty();
	/// assert!(payload.is_empty());
	/// ```
	#[must_use]
	pub fn new_empty() -> Self {
		Payload(Vec::new())
	}

	/// Returns the underlying bytes as a slice.
	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Consumes the payload, returning the owned byte vector.
	#[must_use]
	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	/// Returns the length in bytes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if the payload carries no bytes.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Interprets the payload as UTF-8, returning an error on invalid bytes.
	pub fn as_str(&self) -> anyhow::Result<&str> {
		Ok(std::str::from_utf8(&self.0)?)
	}
}

impl From<Vec<u8>> for Payload {
	fn from(item: Vec<u8>) -> Self {
		Payload(item)
	}
}

impl From<&[u8]> for Payload {
	fn from(item: &[u8]) -> Self {
		Payload(item.to_vec())
	}
}

impl From<&str> for Payload {
	fn from(item: &str) -> Self {
		Payload(item.as_bytes().to_vec())
	}
}

impl From<String> for Payload {
	fn from(item: String) -> Self {
		Payload(item.into_bytes())
	}
}

impl fmt::Debug for Payload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Payload({} bytes)", self.0.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_is_empty() {
		assert!(Payload::new_empty().is_empty());
		assert_eq!(Payload::new_empty().len(), 0);
	}

	#[test]
	fn round_trips_through_vec() {
		let payload = Payload::from(vec![1u8, 2, 3]);
		assert_eq!(payload.as_slice(), &[1, 2, 3]);
		assert_eq!(payload.into_vec(), vec![1, 2, 3]);
	}

	#[test]
	fn round_trips_through_str() {
		let payload = Payload::from("hello");
		assert_eq!(payload.as_str().unwrap(), "hello");
	}

	#[test]
	fn debug_does_not_dump_bytes() {
		let payload = Payload::from(vec![0u8; 1024]);
		assert_eq!(format!("{payload:?}"), "Payload(1024 bytes)");
	}
}
