//! C5: the tile state machine.
//!
//! A `Tile` owns at most one outstanding [`Request`] at a time and advances
//! through `content_state` as that request resolves. The scheduler never
//! sees a `Tile`; it only sees the `Request` the tile hands it via
//! [`Tile::request_content`], and the back-reference runs the other way
//! (`priority_fn` closures may capture a weak handle to a tile, never an
//! owning one — see the crate's design notes on dangling back-references).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::time::{Duration, SystemTime};

use crate::payload::Payload;
use crate::request::{CancelFn, Completion, PriorityFn, Request, RequestFn, RequestFuture, RequestHandle, RequestKind};
use crate::scheduler::Scheduler;

/// The lifecycle state of a streaming tile's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
	Unloaded,
	Loading,
	Processing,
	Ready,
	Expired,
	Failed,
}

/// A tile whose content is fetched, parsed, and rendered through the
/// scheduler. Parsing itself ("processing") is an external collaborator's
/// job; this type only tracks *that* a parse is pending, not how it runs.
pub struct Tile {
	url: String,
	state: ContentState,
	/// `None` until a request reaches `Ready`; kept across `Expired` so the
	/// previous content keeps rendering while a refetch is in flight.
	content: Option<Payload>,
	/// `true` for tiles with no renderable payload (e.g. an empty quadtree
	/// node); such a tile never contacts the scheduler at all.
	is_empty: bool,
	expire_duration: Option<Duration>,
	expire_date: Option<SystemTime>,
	pending: Option<PendingRequest>,
}

struct PendingRequest {
	handle: RequestHandle,
	future: Pin<Box<dyn Future<Output = Completion> + Send>>,
}

impl Tile {
	/// Constructs a new, `UNLOADED` tile with renderable content expected
	/// from `url`.
	#[must_use]
	pub fn new(url: impl Into<String>) -> Self {
		Tile {
			url: url.into(),
			state: ContentState::Unloaded,
			content: None,
			is_empty: false,
			expire_duration: None,
			expire_date: None,
			pending: None,
		}
	}

	/// Constructs a tile known in advance to carry no renderable payload
	/// (e.g. an empty region of a quadtree/octree). Such a tile transitions
	/// straight to `READY` the first time `request_content` is called,
	/// without ever touching the scheduler.
	#[must_use]
	pub fn new_empty(url: impl Into<String>) -> Self {
		Tile {
			is_empty: true,
			..Tile::new(url)
		}
	}

	#[must_use]
	pub fn state(&self) -> ContentState {
		self.state
	}

	#[must_use]
	pub fn content(&self) -> Option<&Payload> {
		self.content.as_ref()
	}

	/// Sets the duration after which freshly-received content is considered
	/// stale. Takes effect the next time content reaches `READY`.
	pub fn set_expire_duration(&mut self, duration: Duration) {
		self.expire_duration = Some(duration);
	}

	/// Attempts to move `UNLOADED`/`EXPIRED` content into `LOADING` by
	/// submitting a [`Request`] to `scheduler`.
	///
	/// Returns `true` if a request was admitted this frame (the tile is now
	/// `LOADING`); `false` if the scheduler refused admission (the tile
	/// stays in its current state and the caller should retry next frame),
	/// or if the tile was not in a state from which a fetch can start.
	pub fn request_content(
		&mut self,
		scheduler: &mut Scheduler,
		request_fn: RequestFn,
		priority_fn: PriorityFn,
		cancel_fn: Option<CancelFn>,
		kind: RequestKind,
	) -> bool {
		if self.is_empty {
			if self.state == ContentState::Unloaded {
				self.state = ContentState::Ready;
				return true;
			}
			return false;
		}

		if !matches!(self.state, ContentState::Unloaded | ContentState::Expired) {
			return false;
		}

		let url = if self.state == ContentState::Expired {
			append_expired_param(&self.url)
		} else {
			self.url.clone()
		};

		let (mut request, handle) = Request::new(url, request_fn);
		request = request.with_priority_fn(priority_fn).with_kind(kind);
		if let Some(cancel_fn) = cancel_fn {
			request = request.with_cancel_fn(cancel_fn);
		}

		let Some(future) = scheduler.schedule(request) else {
			return false;
		};

		self.pending = Some(PendingRequest {
			handle,
			future: Box::pin(future_to_completion(future)),
		});
		self.state = ContentState::Loading;
		true
	}

	/// Non-blocking poll of the tile's own pending request (if any),
	/// separate from the scheduler's own `update()`: the scheduler only
	/// knows about the request while it is `ISSUED`/`ACTIVE`, but the tile
	/// is the one that must notice when it settles and advance its content
	/// state accordingly. Call once per frame, after `scheduler.update()`.
	pub fn advance(&mut self) {
		let Some(pending) = &mut self.pending else {
			return;
		};
		let waker = futures::task::noop_waker();
		let mut cx = Context::from_waker(&waker);
		let std::task::Poll::Ready(completion) = pending.future.as_mut().poll(&mut cx) else {
			return;
		};
		self.pending = None;
		match completion {
			Completion::Received(payload) => {
				self.content = Some(payload);
				self.state = ContentState::Processing;
			}
			Completion::Failed(err) => {
				log::trace!("tile '{}' failed: {err:#}", self.url);
				self.state = ContentState::Failed;
			}
			Completion::Cancelled => {
				self.state = ContentState::Unloaded;
			}
		}
	}

	/// Advances `PROCESSING` to `READY` once the caller's external
	/// content-parsing step reports completion. A no-op from any other
	/// state.
	pub fn mark_processed(&mut self) {
		if self.state == ContentState::Processing {
			if let Some(duration) = self.expire_duration {
				self.expire_date = SystemTime::now().checked_add(duration);
			}
			self.state = ContentState::Ready;
		}
	}

	/// Checks `now` against `expire_date`, transitioning `READY` to
	/// `EXPIRED` if the date has passed. The previous content is kept (not
	/// cleared) so rendering continues uninterrupted while a refetch runs.
	pub fn check_expiration(&mut self, now: SystemTime) {
		if self.state == ContentState::Ready {
			if let Some(expire_date) = self.expire_date {
				if now > expire_date {
					self.state = ContentState::Expired;
				}
			}
		}
	}

	/// Cancels any in-flight request and releases content, returning the
	/// tile to `UNLOADED`. Valid from `READY` or `EXPIRED`; a no-op from
	/// `UNLOADED` itself.
	pub fn unload(&mut self) {
		if let Some(pending) = self.pending.take() {
			pending.handle.cancel();
		}
		self.content = None;
		self.expire_date = None;
		self.state = ContentState::Unloaded;
	}
}

/// Wraps the scheduler's `RequestFuture` as a plain `Future<Output =
/// Completion>` so `Tile` doesn't need to know about its polling contract
/// beyond `Future`.
fn future_to_completion(future: RequestFuture) -> impl Future<Output = Completion> + Send {
	future
}

/// Appends `expired=<unix-ms timestamp>` to `url`'s query string, per the
/// contract that re-fetching expired content must defeat upstream caches.
fn append_expired_param(url: &str) -> String {
	let now_ms = SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or(0);
	let separator = if url.contains('?') { '&' } else { '?' };
	format!("{url}{separator}expired={now_ms}")
}
