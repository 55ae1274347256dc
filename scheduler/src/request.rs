//! C3: the request record — a fetch descriptor plus mutable scheduling state.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::payload::Payload;

/// A boxed, `Send` future, used for both `request_fn`'s return value and the
/// future handed back to callers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Invoked at most once; returns a future resolving to the fetched payload.
pub type RequestFn = Arc<dyn Fn() -> BoxFuture<anyhow::Result<Payload>> + Send + Sync>;
/// Invoked when the scheduler abandons an issued/active request.
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;
/// Invoked at most once per frame by the scheduler to refresh `priority`.
pub type PriorityFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Advisory classification of a request, used only for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
	Terrain,
	Imagery,
	Tiles3d,
	Other,
}

/// The lifecycle state of a [`Request`]. A request never returns from a
/// terminal state (`Received`, `Cancelled`, `Failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
	Unissued,
	Issued,
	Active,
	Received,
	Cancelled,
	Failed,
}

impl RequestState {
	#[must_use]
	pub fn is_terminal(self) -> bool {
		matches!(self, RequestState::Received | RequestState::Cancelled | RequestState::Failed)
	}
}

/// The value delivered to whoever is holding the future returned by
/// `schedule()`/`request()`.
#[derive(Debug)]
pub enum Completion {
	/// The transport resolved successfully.
	Received(Payload),
	/// The request was cancelled, either by the caller or by the scheduler
	/// (eviction/saturation). Not an error: the caller is expected to retry.
	Cancelled,
	/// The transport's future resolved to an error.
	Failed(anyhow::Error),
}

struct DeferredState {
	result: Option<Completion>,
	waker: Option<Waker>,
}

type SharedDeferred = Arc<Mutex<DeferredState>>;

/// The future half of a request's deferred resolution, returned to callers
/// from `schedule()`/`request()`. Must not be polled again after it has
/// yielded `Poll::Ready`.
pub struct RequestFuture(SharedDeferred);

impl Future for RequestFuture {
	type Output = Completion;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
		let mut inner = self.0.lock().unwrap();
		if let Some(result) = inner.result.take() {
			Poll::Ready(result)
		} else {
			inner.waker = Some(cx.waker().clone());
			Poll::Pending
		}
	}
}

/// The resolver half of a request's deferred resolution, held internally by
/// the `Request` until a terminal transition resolves or drops it.
struct DeferredResolver(SharedDeferred);

impl DeferredResolver {
	fn resolve(&self, completion: Completion) {
		let mut inner = self.0.lock().unwrap();
		inner.result = Some(completion);
		if let Some(waker) = inner.waker.take() {
			waker.wake();
		}
	}
}

fn deferred_pair() -> (DeferredResolver, RequestFuture) {
	let shared = Arc::new(Mutex::new(DeferredState {
		result: None,
		waker: None,
	}));
	(DeferredResolver(shared.clone()), RequestFuture(shared))
}

/// Process-wide unique identity for a `Request`, stable across its lifetime
/// (a `clone_unissued()` copy gets a fresh id, since it is a distinct unit
/// of work as far as the scheduler is concerned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> RequestId {
	RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
}

/// An externally-retained cancellation capability for a [`Request`], created
/// alongside it by [`Request::new`]. Dropping a handle does *not* cancel the
/// request; only calling [`RequestHandle::cancel`] does.
#[derive(Debug, Clone)]
pub struct RequestHandle {
	id: RequestId,
	cancelled_flag: Arc<AtomicBool>,
}

impl RequestHandle {
	/// The identity of the `Request` this handle was created alongside.
	#[must_use]
	pub fn id(&self) -> RequestId {
		self.id
	}

	/// Sets the cancellation flag. Observed by the scheduler on its next
	/// `update()`; does not release resources synchronously.
	pub fn cancel(&self) {
		self.cancelled_flag.store(true, Ordering::Relaxed);
	}

	/// `true` if `cancel()` has been called.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.cancelled_flag.load(Ordering::Relaxed)
	}
}

/// A descriptor for one outbound fetch plus mutable scheduling state (C3).
pub struct Request {
	id: RequestId,
	/// Absolute or relative URL; used to derive `server_key`.
	pub url: String,
	/// Stable per-origin identifier. `None` until derived by the scheduler.
	pub server_key: Option<String>,
	request_fn: RequestFn,
	cancel_fn: Option<CancelFn>,
	priority_fn: Option<PriorityFn>,
	/// Numeric priority; lower sorts first. Refreshed from `priority_fn`
	/// once per frame by the scheduler.
	pub priority: f64,
	/// If `false`, bypasses the scheduler and starts immediately.
	pub throttle: bool,
	/// If `true`, the per-server cap applies in addition to the global one.
	pub throttle_by_server: bool,
	/// Advisory, for metrics only.
	pub kind: RequestKind,
	state: RequestState,
	deferred: Option<DeferredResolver>,
	cancelled_flag: Arc<AtomicBool>,
}

impl Request {
	/// Constructs a new, `UNISSUED` request and the handle that lets its
	/// owner cancel it later.
	#[must_use]
	pub fn new(url: impl Into<String>, request_fn: RequestFn) -> (Self, RequestHandle) {
		let id = next_request_id();
		let cancelled_flag = Arc::new(AtomicBool::new(false));
		let request = Request {
			id,
			url: url.into(),
			server_key: None,
			request_fn,
			cancel_fn: None,
			priority_fn: None,
			priority: f64::INFINITY,
			throttle: true,
			throttle_by_server: true,
			kind: RequestKind::Other,
			state: RequestState::Unissued,
			deferred: None,
			cancelled_flag: cancelled_flag.clone(),
		};
		let handle = RequestHandle { id, cancelled_flag };
		(request, handle)
	}

	#[must_use]
	pub fn with_priority(mut self, priority: f64) -> Self {
		self.priority = priority;
		self
	}

	#[must_use]
	pub fn with_priority_fn(mut self, priority_fn: PriorityFn) -> Self {
		self.priority_fn = Some(priority_fn);
		self
	}

	#[must_use]
	pub fn with_cancel_fn(mut self, cancel_fn: CancelFn) -> Self {
		self.cancel_fn = Some(cancel_fn);
		self
	}

	#[must_use]
	pub fn with_throttle(mut self, throttle: bool) -> Self {
		self.throttle = throttle;
		self
	}

	#[must_use]
	pub fn with_throttle_by_server(mut self, throttle_by_server: bool) -> Self {
		self.throttle_by_server = throttle_by_server;
		self
	}

	#[must_use]
	pub fn with_kind(mut self, kind: RequestKind) -> Self {
		self.kind = kind;
		self
	}

	#[must_use]
	pub fn with_server_key(mut self, server_key: impl Into<String>) -> Self {
		self.server_key = Some(server_key.into());
		self
	}

	#[must_use]
	pub fn id(&self) -> RequestId {
		self.id
	}

	#[must_use]
	pub fn state(&self) -> RequestState {
		self.state
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.cancelled_flag.load(Ordering::Relaxed)
	}

	/// Produces a fresh `UNISSUED` copy with the same descriptor fields, no
	/// deferred, and a cleared cancellation flag — used when a request
	/// rejected by admission must be re-enqueued by its owner.
	#[must_use]
	pub fn clone_unissued(&self) -> (Self, RequestHandle) {
		let mut fresh = Self::new(self.url.clone(), self.request_fn.clone()).0;
		fresh.server_key = self.server_key.clone();
		fresh.cancel_fn = self.cancel_fn.clone();
		fresh.priority_fn = self.priority_fn.clone();
		fresh.priority = self.priority;
		fresh.throttle = self.throttle;
		fresh.throttle_by_server = self.throttle_by_server;
		fresh.kind = self.kind;
		let handle = RequestHandle {
			id: fresh.id,
			cancelled_flag: fresh.cancelled_flag.clone(),
		};
		(fresh, handle)
	}

	/// Re-evaluates `priority` from `priority_fn`, if present. Called
	/// exactly once per frame, per pending request, by the scheduler.
	pub(crate) fn refresh_priority(&mut self) {
		if let Some(priority_fn) = &self.priority_fn {
			self.priority = priority_fn();
		}
	}

	/// Invokes the transport closure. Panics (via `debug_assert!`) if called
	/// more than once; the caller (the scheduler) enforces this by only
	/// calling it on the UNISSUED -> ACTIVE transition.
	pub(crate) fn invoke_request_fn(&self) -> BoxFuture<anyhow::Result<Payload>> {
		(self.request_fn)()
	}

	pub(crate) fn invoke_cancel_fn(&self) {
		if let Some(cancel_fn) = &self.cancel_fn {
			cancel_fn();
		}
	}

	/// Transitions `UNISSUED` to either `ISSUED` or `ACTIVE`, creating the
	/// deferred pair and returning the future half to hand to the caller.
	pub(crate) fn issue(&mut self, state: RequestState) -> RequestFuture {
		debug_assert_eq!(self.state, RequestState::Unissued);
		debug_assert!(matches!(state, RequestState::Issued | RequestState::Active));
		let (resolver, future) = deferred_pair();
		self.deferred = Some(resolver);
		self.state = state;
		future
	}

	pub(crate) fn set_active(&mut self) {
		debug_assert_eq!(self.state, RequestState::Issued);
		self.state = RequestState::Active;
	}

	pub(crate) fn complete_received(&mut self, payload: Payload) {
		debug_assert!(!self.state.is_terminal());
		if let Some(resolver) = self.deferred.take() {
			resolver.resolve(Completion::Received(payload));
		}
		self.state = RequestState::Received;
	}

	pub(crate) fn complete_failed(&mut self, err: anyhow::Error) {
		debug_assert!(!self.state.is_terminal());
		if let Some(resolver) = self.deferred.take() {
			resolver.resolve(Completion::Failed(err));
		}
		self.state = RequestState::Failed;
	}

	pub(crate) fn complete_cancelled(&mut self) {
		debug_assert!(!self.state.is_terminal());
		if let Some(resolver) = self.deferred.take() {
			resolver.resolve(Completion::Cancelled);
		}
		self.state = RequestState::Cancelled;
	}
}

impl std::fmt::Debug for Request {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Request")
			.field("id", &self.id)
			.field("url", &self.url)
			.field("server_key", &self.server_key)
			.field("priority", &self.priority)
			.field("throttle", &self.throttle)
			.field("throttle_by_server", &self.throttle_by_server)
			.field("kind", &self.kind)
			.field("state", &self.state)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	fn immediate_ok(payload: &'static str) -> RequestFn {
		Arc::new(move || Box::pin(async move { Ok(Payload::from(payload)) }))
	}

	#[test]
	fn new_request_is_unissued() {
		let (req, handle) = Request::new("https://example.com/a", immediate_ok("x"));
		assert_eq!(req.state(), RequestState::Unissued);
		assert!(!handle.is_cancelled());
		assert_eq!(req.id(), handle.id());
	}

	#[test]
	fn cancel_handle_sets_flag_observed_by_request() {
		let (req, handle) = Request::new("https://example.com/a", immediate_ok("x"));
		assert!(!req.is_cancelled());
		handle.cancel();
		assert!(req.is_cancelled());
	}

	#[test]
	fn clone_unissued_resets_state_and_flag() {
		let (mut req, handle) = Request::new("https://example.com/a", immediate_ok("x"));
		req.priority = 7.0;
		let _future = req.issue(RequestState::Issued);
		handle.cancel();

		let (fresh, fresh_handle) = req.clone_unissued();
		assert_eq!(fresh.state(), RequestState::Unissued);
		assert!(!fresh.is_cancelled());
		assert!(!fresh_handle.is_cancelled());
		assert_eq!(fresh.priority, 7.0);
		assert_ne!(fresh.id(), req.id());
	}

	#[test]
	fn priority_fn_is_invoked_on_refresh() {
		let calls = Arc::new(AtomicUsize::new(0));
		let calls2 = calls.clone();
		let (mut req, _handle) = Request::new("https://example.com/a", immediate_ok("x"));
		req = req.with_priority_fn(Arc::new(move || {
			calls2.fetch_add(1, Ordering::Relaxed);
			42.0
		}));
		req.refresh_priority();
		assert_eq!(req.priority, 42.0);
		assert_eq!(calls.load(Ordering::Relaxed), 1);
	}

	#[tokio::test]
	async fn issue_then_complete_received_resolves_future() {
		let (mut req, _handle) = Request::new("https://example.com/a", immediate_ok("x"));
		let future = req.issue(RequestState::Active);
		req.complete_received(Payload::from("hello"));
		match future.await {
			Completion::Received(payload) => assert_eq!(payload.as_str().unwrap(), "hello"),
			other => panic!("expected Received, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn complete_cancelled_resolves_with_no_payload() {
		let (mut req, _handle) = Request::new("https://example.com/a", immediate_ok("x"));
		let future = req.issue(RequestState::Issued);
		req.complete_cancelled();
		assert!(matches!(future.await, Completion::Cancelled));
	}
}
