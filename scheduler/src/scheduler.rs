//! C4: the scheduler core — per-frame admission, eviction, and reconciliation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;

use scheduler_macros::context;

use crate::config::SchedulerConfig;
use crate::priority_heap::PriorityHeap;
use crate::request::{BoxFuture, Request, RequestFuture, RequestState};
use crate::server_registry::ServerRegistry;
use crate::stats::Statistics;
use crate::url::{is_data_or_blob_uri, server_key_for};

/// An event listener invoked after every terminal transition. Receives
/// `Some(&error)` when the transition was `FAILED`, `None` otherwise
/// (`RECEIVED` or `CANCELLED`).
pub type CompletionListener = Arc<dyn Fn(Option<&anyhow::Error>) + Send + Sync>;

struct ActiveSlot {
	request: Request,
	future: BoxFuture<anyhow::Result<crate::payload::Payload>>,
	/// `false` for requests that bypassed admission (data/blob URIs, or
	/// `throttle=false`/globally-disabled throttling) — these are still
	/// driven to completion here, but never occupy a counter slot.
	counted: bool,
}

/// The per-process admission/throttling layer (C4).
///
/// Single-threaded cooperative: every mutating method takes `&mut self`,
/// matching the spec's "entire scheduler executes on one logical thread"
/// contract. The crate never spawns its own tasks; completion futures
/// returned by `request_fn` are polled manually inside [`Scheduler::update`].
pub struct Scheduler {
	config: SchedulerConfig,
	base_url: Option<::url::Url>,
	heap: PriorityHeap,
	active: Vec<ActiveSlot>,
	server_registry: ServerRegistry,
	stats: Statistics,
	listeners: Vec<CompletionListener>,
}

impl Scheduler {
	/// Constructs a scheduler from a validated configuration.
	///
	/// # Errors
	///
	/// Propagates [`SchedulerConfig::validate`]'s error.
	#[context("while constructing a Scheduler")]
	pub fn new(config: SchedulerConfig) -> anyhow::Result<Self> {
		config.validate()?;
		let heap = PriorityHeap::new(config.priority_heap_length);
		Ok(Scheduler {
			config,
			base_url: None,
			heap,
			active: Vec::new(),
			server_registry: ServerRegistry::new(),
			stats: Statistics::default(),
			listeners: Vec::new(),
		})
	}

	/// Configures the URL relative requests are resolved against, standing
	/// in for the browser's "document location" the reference implementation
	/// assumes is always available.
	#[must_use]
	pub fn with_base_url(mut self, base_url: ::url::Url) -> Self {
		self.base_url = Some(base_url);
		self
	}

	/// Registers a listener invoked after every terminal transition.
	pub fn on_request_completed(&mut self, listener: CompletionListener) {
		self.listeners.push(listener);
	}

	/// A read-only snapshot of the accumulated counters.
	#[must_use]
	pub fn statistics(&self) -> Statistics {
		self.stats
	}

	/// Zeroes the statistics snapshot.
	pub fn clear_for_tests(&mut self) {
		self.stats.clear_for_tests();
	}

	/// Derives the canonical server key for `url`, resolving relative URLs
	/// against the configured base URL.
	///
	/// # Errors
	///
	/// See [`url::server_key_for`].
	pub fn get_server_key(&self, request_url: &str) -> anyhow::Result<String> {
		server_key_for(request_url, self.base_url.as_ref())
	}

	/// `true` iff `n` more requests could be admitted to `server_key`
	/// without exceeding its cap.
	#[must_use]
	pub fn server_has_open_slots(&self, server_key: &str, n: usize) -> bool {
		self.server_registry.has_open_slot(&self.config, server_key, n)
	}

	/// `true` iff `n` more pending requests could be inserted into the
	/// priority heap without forcing an eviction.
	#[must_use]
	pub fn heap_has_open_slots(&self, n: usize) -> bool {
		self.heap.has_open_slots(n)
	}

	/// Shrinks or grows the pending-request bound. Shrinking cancels the
	/// highest-priority (lowest-numeric) pending requests down to the new
	/// bound, per the spec's explicit (if unusual) eviction-on-shrink design.
	pub fn set_priority_heap_length(&mut self, new_length: usize) {
		for mut evicted in self.heap.set_capacity(new_length) {
			evicted.invoke_cancel_fn();
			evicted.complete_cancelled();
			self.stats.record_cancelled_pending();
			self.notify_listeners(None);
		}
	}

	fn counted_active_len(&self) -> usize {
		self.active.iter().filter(|slot| slot.counted).count()
	}

	/// Submits `req` for admission.
	///
	/// - A `data:`/`blob:` URL bypasses the scheduler entirely.
	/// - If throttling is globally disabled, or `req.throttle` is `false`,
	///   the request starts immediately without touching any counters.
	/// - Otherwise the request competes for a server slot and a global
	///   slot. If both are free, it starts immediately, the same frame —
	///   the heap only ever holds genuine overflow, requests that arrived
	///   while no slot was free. If no global slot is free, it is inserted
	///   into the priority heap instead and `Some` future is returned
	///   (admission happens later, in `update()`); on failure (a saturated
	///   server, or a heap insert that evicts the request itself) `None`
	///   is returned and the caller is expected to retry.
	pub fn schedule(&mut self, mut req: Request) -> Option<RequestFuture> {
		if is_data_or_blob_uri(&req.url) {
			return Some(self.start_untracked(req));
		}

		if req.server_key.is_none() {
			match self.get_server_key(&req.url) {
				Ok(key) => req.server_key = Some(key),
				Err(err) => {
					log::warn!("rejecting request for '{}': {err:#}", req.url);
					return None;
				}
			}
		}

		if !self.config.throttle_requests || !req.throttle {
			return Some(self.start_untracked(req));
		}

		let server_key = req.server_key.clone().expect("server_key derived above");

		if req.throttle_by_server && !self.server_registry.has_open_slot(&self.config, &server_key, 1) {
			return None;
		}

		req.refresh_priority();

		if self.counted_active_len() < self.config.max_requests {
			self.stats.record_attempt();
			return Some(self.start_direct(req));
		}

		let req_id = req.id();
		let future = req.issue(RequestState::Issued);

		match self.heap.insert(req) {
			None => {
				self.stats.record_attempt();
				Some(future)
			}
			Some(evicted) if evicted.id() == req_id => None,
			Some(mut evicted) => {
				self.stats.record_attempt();
				evicted.invoke_cancel_fn();
				evicted.complete_cancelled();
				self.stats.record_cancelled_pending();
				self.notify_listeners(None);
				Some(future)
			}
		}
	}

	fn start_untracked(&mut self, mut req: Request) -> RequestFuture {
		let future = req.issue(RequestState::Active);
		let transport = req.invoke_request_fn();
		self.stats.record_attempt();
		self.active.push(ActiveSlot {
			request: req,
			future: transport,
			counted: false,
		});
		future
	}

	/// Admits `req` straight to `ACTIVE`, bypassing the heap entirely —
	/// the `schedule()`-time counterpart to `start_counted`, used when a
	/// global (and, if required, per-server) slot is already free.
	fn start_direct(&mut self, mut req: Request) -> RequestFuture {
		let server_key = req.server_key.clone().expect("server_key derived above");
		let future = req.issue(RequestState::Active);
		self.server_registry.acquire(&server_key);
		let transport = req.invoke_request_fn();
		self.active.push(ActiveSlot {
			request: req,
			future: transport,
			counted: true,
		});
		future
	}

	fn start_counted(&mut self, mut req: Request) {
		debug_assert_eq!(req.state(), RequestState::Issued);
		req.set_active();
		let server_key = req.server_key.clone().expect("server_key set before heap insertion");
		self.server_registry.acquire(&server_key);
		let transport = req.invoke_request_fn();
		self.active.push(ActiveSlot {
			request: req,
			future: transport,
			counted: true,
		});
	}

	fn notify_listeners(&self, error: Option<&anyhow::Error>) {
		for listener in &self.listeners {
			listener(error);
		}
	}

	fn release_if_counted(&mut self, slot: &ActiveSlot) {
		if slot.counted {
			let key = slot.request.server_key.as_deref().expect("counted slot has a server key");
			self.server_registry.release(key);
		}
	}

	/// Per-frame reconciliation: reaps completed/cancelled active requests,
	/// re-evaluates pending priorities and resorts the heap, then admits
	/// as many pending requests as the remaining global capacity allows.
	pub fn update(&mut self) {
		self.reap_active();
		self.refresh_and_resort_pending();
		self.admit_pending();
		self.log_quiescence_if_needed();
	}

	fn reap_active(&mut self) {
		let waker = futures::task::noop_waker();
		let mut cx = Context::from_waker(&waker);

		let mut remaining = Vec::with_capacity(self.active.len());
		for mut slot in std::mem::take(&mut self.active) {
			if slot.request.is_cancelled() {
				self.release_if_counted(&slot);
				if slot.counted {
					self.stats.record_cancelled_active();
				}
				slot.request.invoke_cancel_fn();
				slot.request.complete_cancelled();
				self.notify_listeners(None);
				continue;
			}

			match slot.future.as_mut().poll(&mut cx) {
				std::task::Poll::Pending => remaining.push(slot),
				std::task::Poll::Ready(Ok(payload)) => {
					self.release_if_counted(&slot);
					slot.request.complete_received(payload);
					self.notify_listeners(None);
				}
				std::task::Poll::Ready(Err(err)) => {
					self.release_if_counted(&slot);
					self.stats.record_failed();
					self.notify_listeners(Some(&err));
					slot.request.complete_failed(err);
				}
			}
		}
		self.active = remaining;
	}

	fn refresh_and_resort_pending(&mut self) {
		for pending in self.heap.iter_mut() {
			pending.refresh_priority();
		}
		self.heap.resort();
	}

	fn admit_pending(&mut self) {
		let open = self.config.max_requests.saturating_sub(self.counted_active_len());
		for _ in 0..open {
			let Some(mut popped) = self.heap.pop() else {
				break;
			};

			if popped.is_cancelled() {
				popped.invoke_cancel_fn();
				popped.complete_cancelled();
				self.stats.record_cancelled_pending();
				self.notify_listeners(None);
				continue;
			}

			let server_key = popped.server_key.clone().expect("server key set before heap insertion");
			if popped.throttle_by_server && !self.server_registry.has_open_slot(&self.config, &server_key, 1) {
				popped.invoke_cancel_fn();
				popped.complete_cancelled();
				self.stats.record_cancelled_pending();
				self.notify_listeners(None);
				continue;
			}

			self.start_counted(popped);
		}
	}

	fn log_quiescence_if_needed(&mut self) {
		let active_now = self.active.len() as u64;
		let quiesced = self.stats.just_quiesced(active_now);
		self.stats.set_active(active_now);
		if quiesced && self.config.log_quiescent_stats {
			log::debug!(
				"scheduler quiesced: attempted={} cancelled={} cancelled_active={} failed={}",
				self.stats.attempted,
				self.stats.cancelled,
				self.stats.cancelled_active,
				self.stats.failed,
			);
		}
		self.stats.last_active = active_now;
	}
}
