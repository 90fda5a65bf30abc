//! The crawl scheduler.
//!
//! Owns the module registry and the four stage pools, admits requests and
//! runs one loop per stage:
//!
//! ```text
//! request pool --fetch--> response pool --parse--> item pool --persist-->
//!      ^                                    |
//!      +------------ admission <------------+
//! ```
//!
//! Every failure ends up in the error pool, drained by [`Scheduler::error_chan`].

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{BufferPolicy, ModuleSet, RequestPolicy};
use crate::domain::{DefaultDomainResolver, DomainResolver};
use crate::error::CrawlerError;
use crate::mid::Mid;
use crate::models::{Data, HttpRequest, Item, Request, Response};
use crate::module::{ModuleInstance, ModuleSummary, ModuleType};
use crate::pool::BufferPool;
use crate::registry::{LeastLoaded, ModuleRegistry, SelectionStrategy};
use crate::status::{Status, check_status};
use crate::summary::{ModuleCounts, SchedulerSummary};
use crate::sync::{lock, read, write};

/// Delay before a datum whose stage had no module available is resubmitted.
const RESUBMIT_DELAY: Duration = Duration::from_millis(50);

/// The four stage pools of one run.
#[derive(Clone)]
struct Pools {
    request: Arc<BufferPool<Request>>,
    response: Arc<BufferPool<Response>>,
    item: Arc<BufferPool<Item>>,
    error: Arc<BufferPool<CrawlerError>>,
}

impl Pools {
    fn new(policy: &BufferPolicy) -> Result<Self, CrawlerError> {
        Ok(Self {
            request: Arc::new(BufferPool::new(
                policy.req_buffer_cap,
                policy.req_max_buffer_number,
            )?),
            response: Arc::new(BufferPool::new(
                policy.resp_buffer_cap,
                policy.resp_max_buffer_number,
            )?),
            item: Arc::new(BufferPool::new(
                policy.item_buffer_cap,
                policy.item_max_buffer_number,
            )?),
            error: Arc::new(BufferPool::new(
                policy.error_buffer_cap,
                policy.error_max_buffer_number,
            )?),
        })
    }

    /// Replaces every closed pool with a fresh one of the same size.
    fn reopen_closed(&mut self) -> Result<(), CrawlerError> {
        reopen(&mut self.request)?;
        reopen(&mut self.response)?;
        reopen(&mut self.item)?;
        reopen(&mut self.error)?;
        Ok(())
    }

    fn close(&self) {
        self.request.close();
        self.response.close();
        self.item.close();
        self.error.close();
    }
}

fn reopen<T>(pool: &mut Arc<BufferPool<T>>) -> Result<(), CrawlerError> {
    if pool.is_closed() {
        *pool = Arc::new(BufferPool::new(pool.buffer_cap(), pool.max_buffer_number())?);
    }
    Ok(())
}

/// Arguments of the last successful `init`.
#[derive(Debug, Clone)]
struct InitArgs {
    request_policy: RequestPolicy,
    buffer_policy: BufferPolicy,
    module_counts: ModuleCounts,
}

/// Why admission turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    Cancelled,
    NoHttpRequest,
    Scheme,
    Duplicate,
    Domain,
    Depth,
}

struct Inner {
    status: RwLock<Status>,
    registry: ModuleRegistry,
    resolver: Arc<dyn DomainResolver>,
    args: RwLock<Option<InitArgs>>,
    max_depth: AtomicU32,
    accepted_domains: RwLock<HashSet<String>>,
    urls: Mutex<HashSet<String>>,
    pools: RwLock<Option<Pools>>,
    cancel: Mutex<CancellationToken>,
    /// Detached request/response/item sends.
    sends: TaskTracker,
    /// Detached error reports.
    reports: TaskTracker,
    /// Data taken from a pool and not yet dispatched.
    in_hand: AtomicU64,
    dropped_sends: Arc<AtomicU64>,
}

/// Drives a crawl across registered downloaders, analyzers and pipelines.
///
/// Cloning is cheap; clones control the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(DefaultDomainResolver), Arc::new(LeastLoaded))
    }

    pub fn with_domain_resolver(resolver: Arc<dyn DomainResolver>) -> Self {
        Self::with_parts(resolver, Arc::new(LeastLoaded))
    }

    pub fn with_parts(
        resolver: Arc<dyn DomainResolver>,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                status: RwLock::new(Status::Uninitialized),
                registry: ModuleRegistry::with_strategy(strategy),
                resolver,
                args: RwLock::new(None),
                max_depth: AtomicU32::new(0),
                accepted_domains: RwLock::new(HashSet::new()),
                urls: Mutex::new(HashSet::new()),
                pools: RwLock::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                sends: TaskTracker::new(),
                reports: TaskTracker::new(),
                in_hand: AtomicU64::new(0),
                dropped_sends: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Validates the arguments, resets all per-run state and registers the
    /// modules. On failure the previous status is restored.
    pub fn init(
        &self,
        request_policy: RequestPolicy,
        buffer_policy: BufferPolicy,
        modules: ModuleSet,
    ) -> Result<(), CrawlerError> {
        let previous = self.inner.begin(Status::Initializing)?;
        tracing::info!("Initializing scheduler");
        let result = self.inner.init(request_policy, buffer_policy, modules);
        self.inner.finish(&result, Status::Initialized, previous);
        match &result {
            Ok(()) => tracing::info!("Scheduler initialized"),
            Err(e) => tracing::warn!(error = %e, "Scheduler initialization failed"),
        }
        result
    }

    /// Launches the stage loops and admits the seed at depth 0.
    ///
    /// Must be called from within a Tokio runtime. A panic inside the start
    /// sequence is reported as a fatal scheduler error.
    pub fn start(&self, seed: HttpRequest) -> Result<(), CrawlerError> {
        let previous = self.inner.begin(Status::Starting)?;
        tracing::info!("Starting scheduler");
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.inner.start(seed))) {
            Ok(result) => result,
            Err(payload) => {
                let message = format!("Fatal scheduler error: {}", panic_message(&*payload));
                tracing::error!("{message}");
                Err(CrawlerError::scheduler(message))
            }
        };
        self.inner.finish(&result, Status::Started, previous);
        if result.is_ok() {
            tracing::info!("Scheduler started");
        }
        result
    }

    /// Cancels the stage loops and closes every pool.
    pub fn stop(&self) -> Result<(), CrawlerError> {
        let previous = self.inner.begin(Status::Stopping)?;
        tracing::info!("Stopping scheduler");
        self.inner.current_token().cancel();
        if let Some(pools) = self.inner.pools() {
            pools.close();
        }
        let result = Ok(());
        self.inner.finish(&result, Status::Stopped, previous);
        tracing::info!("Scheduler stopped");
        result
    }

    pub fn status(&self) -> Status {
        *read(&self.inner.status)
    }

    /// Stream of reported errors. Ends when the scheduler is stopped or the
    /// error pool closes. `None` before the first `init`.
    pub fn error_chan(&self) -> Option<mpsc::Receiver<CrawlerError>> {
        let pool = self.inner.pools()?.error;
        let cancel = self.inner.current_token();
        let (tx, rx) = mpsc::channel(pool.buffer_cap() as usize);
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let error = tokio::select! {
                    () = cancel.cancelled() => break,
                    got = pool.get() => match got {
                        Ok(error) => error,
                        Err(_) => {
                            tracing::warn!("Error pool closed, stopping error reception");
                            break;
                        }
                    },
                };
                tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = tx.send(error) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Some(rx)
    }

    /// True when no module is handling anything, the request, response and
    /// item pools are empty and nothing is in transit between them.
    pub fn idle(&self) -> bool {
        let inner = &self.inner;
        let modules_idle = inner
            .registry
            .get_all()
            .values()
            .all(|m| m.module().handling_number() == 0);
        if !modules_idle {
            return false;
        }
        if let Some(pools) = inner.pools()
            && (pools.request.total() > 0 || pools.response.total() > 0 || pools.item.total() > 0)
        {
            return false;
        }
        inner.in_hand.load(Ordering::Acquire) == 0 && inner.sends.is_empty()
    }

    pub fn summary(&self) -> SchedulerSummary {
        let inner = &self.inner;
        let args = read(&inner.args).clone();
        let pools = inner.pools();
        let summaries = |module_type: ModuleType| -> Vec<ModuleSummary> {
            inner
                .registry
                .get_all_by_type(module_type)
                .iter()
                .map(|m| m.module().summary())
                .collect()
        };
        SchedulerSummary {
            request_policy: args.as_ref().map(|a| a.request_policy.clone()),
            buffer_policy: args.as_ref().map(|a| a.buffer_policy),
            module_counts: args.map(|a| a.module_counts).unwrap_or_default(),
            status: self.status().to_string(),
            downloaders: summaries(ModuleType::Downloader),
            analyzers: summaries(ModuleType::Analyzer),
            pipelines: summaries(ModuleType::Pipeline),
            request_pool: pools.as_ref().map(|p| p.request.stats()),
            response_pool: pools.as_ref().map(|p| p.response.stats()),
            item_pool: pools.as_ref().map(|p| p.item.stats()),
            error_pool: pools.as_ref().map(|p| p.error.stats()),
            url_number: lock(&inner.urls).len(),
            dropped_sends: inner.dropped_sends.load(Ordering::Relaxed),
        }
    }

    /// The registry holding this scheduler's modules.
    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("status", &self.status())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Marks one datum as taken out of a pool until dropped.
struct InHand<'a>(&'a AtomicU64);

impl Drop for InHand<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Inner {
    fn begin(&self, wanted: Status) -> Result<Status, CrawlerError> {
        let mut status = write(&self.status);
        check_status(*status, wanted)?;
        let previous = *status;
        *status = wanted;
        Ok(previous)
    }

    fn finish(&self, result: &Result<(), CrawlerError>, settled: Status, previous: Status) {
        *write(&self.status) = if result.is_ok() { settled } else { previous };
    }

    fn pools(&self) -> Option<Pools> {
        read(&self.pools).clone()
    }

    fn current_token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    fn init(
        &self,
        request_policy: RequestPolicy,
        buffer_policy: BufferPolicy,
        modules: ModuleSet,
    ) -> Result<(), CrawlerError> {
        request_policy.check()?;
        buffer_policy.check()?;
        modules.check()?;

        self.registry.clear();
        lock(&self.urls).clear();
        *write(&self.accepted_domains) = request_policy
            .accepted_domains
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();
        self.max_depth
            .store(request_policy.max_depth, Ordering::Release);

        let pools = Pools::new(&buffer_policy)?;
        if let Some(old) = write(&self.pools).replace(pools) {
            old.close();
        }
        *lock(&self.cancel) = CancellationToken::new();

        let module_counts = ModuleCounts {
            downloaders: modules.downloaders.len(),
            analyzers: modules.analyzers.len(),
            pipelines: modules.pipelines.len(),
        };
        let instances = modules
            .downloaders
            .into_iter()
            .map(ModuleInstance::from)
            .chain(modules.analyzers.into_iter().map(ModuleInstance::from))
            .chain(modules.pipelines.into_iter().map(ModuleInstance::from));
        for instance in instances {
            let (module_type, id) = (instance.module_type(), instance.id().clone());
            if !self.registry.register(instance)? {
                return Err(CrawlerError::scheduler(format!(
                    "couldn't register {module_type} instance with MID {id}: already registered"
                )));
            }
        }

        *write(&self.args) = Some(InitArgs {
            request_policy,
            buffer_policy,
            module_counts,
        });
        Ok(())
    }

    fn start(self: &Arc<Self>, seed: HttpRequest) -> Result<(), CrawlerError> {
        let host = seed
            .host()
            .ok_or_else(|| CrawlerError::illegal_parameter("first HTTP request has no host"))?;
        let primary_domain = self.resolver.primary_domain(host)?;
        tracing::info!(%primary_domain, "Primary domain accepted");
        write(&self.accepted_domains).insert(primary_domain);

        let pools = {
            let mut guard = write(&self.pools);
            let pools = guard
                .as_mut()
                .ok_or_else(|| CrawlerError::scheduler("buffer pools are not initialized"))?;
            pools.reopen_closed()?;
            pools.clone()
        };
        let token = {
            let mut guard = lock(&self.cancel);
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };

        tokio::spawn(Arc::clone(self).fetch_loop(pools.clone(), token.clone()));
        tokio::spawn(Arc::clone(self).parse_loop(pools.clone(), token.clone()));
        tokio::spawn(Arc::clone(self).persist_loop(pools.clone(), token.clone()));

        let url = seed.url.to_string();
        if let Err(reason) = self.admit(&pools, &token, Request::new(seed, 0)) {
            tracing::warn!(%url, ?reason, "Seed request was not admitted");
        }
        Ok(())
    }

    fn hold(&self) -> InHand<'_> {
        self.in_hand.fetch_add(1, Ordering::AcqRel);
        InHand(&self.in_hand)
    }

    /// Applies the admission rules and enqueues the request if it passes.
    fn admit(
        &self,
        pools: &Pools,
        token: &CancellationToken,
        request: Request,
    ) -> Result<(), Rejection> {
        let url = self.check_admission(token, &request)?;
        if !lock(&self.urls).insert(url) {
            return Err(Rejection::Duplicate);
        }
        self.send(&pools.request, request, token, None);
        Ok(())
    }

    /// Returns the URL to record if `request` may be crawled.
    fn check_admission(
        &self,
        token: &CancellationToken,
        request: &Request,
    ) -> Result<String, Rejection> {
        if token.is_cancelled() {
            return Err(Rejection::Cancelled);
        }
        let http = request.http_req().ok_or(Rejection::NoHttpRequest)?;
        let url = &http.url;
        if !matches!(url.scheme(), "http" | "https") {
            tracing::debug!(%url, "Ignoring request with unsupported scheme");
            return Err(Rejection::Scheme);
        }
        let url_string = url.to_string();
        if lock(&self.urls).contains(&url_string) {
            tracing::debug!(%url, "Ignoring repeated request");
            return Err(Rejection::Duplicate);
        }
        let accepted = url
            .host_str()
            .and_then(|host| self.resolver.primary_domain(host).ok())
            .is_some_and(|domain| read(&self.accepted_domains).contains(&domain));
        if !accepted {
            tracing::debug!(%url, "Ignoring request outside the accepted domains");
            return Err(Rejection::Domain);
        }
        if request.depth() > self.max_depth.load(Ordering::Acquire) {
            tracing::debug!(%url, depth = request.depth(), "Ignoring request beyond max depth");
            return Err(Rejection::Depth);
        }
        Ok(url_string)
    }

    /// Enqueues `datum` from a detached task, optionally after a delay.
    fn send<T: Send + 'static>(
        &self,
        pool: &Arc<BufferPool<T>>,
        datum: T,
        token: &CancellationToken,
        delay: Option<Duration>,
    ) {
        let pool = Arc::clone(pool);
        let token = token.clone();
        let dropped = Arc::clone(&self.dropped_sends);
        self.sends.spawn(async move {
            if let Some(delay) = delay {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
            if let Err(e) = pool.put(datum).await {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "Dropped detached send");
            }
        });
    }

    /// Tags `error` with its origin and pushes it to the error pool.
    fn report(&self, pools: &Pools, error: CrawlerError, origin: Option<&Mid>) {
        let error = error.tag_with(origin);
        let pool = Arc::clone(&pools.error);
        let dropped = Arc::clone(&self.dropped_sends);
        self.reports.spawn(async move {
            if let Err(e) = pool.put(error).await {
                dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "Dropped error report");
            }
        });
    }

    async fn fetch_loop(self: Arc<Self>, pools: Pools, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let request = tokio::select! {
                () = token.cancelled() => break,
                got = pools.request.get() => match got {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            let _in_hand = self.hold();
            if token.is_cancelled() {
                break;
            }
            self.fetch_one(&pools, &token, request).await;
        }
        tracing::debug!("Fetch loop exited");
    }

    async fn fetch_one(&self, pools: &Pools, token: &CancellationToken, request: Request) {
        let downloader = match self
            .registry
            .get(ModuleType::Downloader)
            .and_then(ModuleInstance::into_downloader)
        {
            Ok(downloader) => downloader,
            Err(e) => {
                tracing::warn!(error = %e, "No downloader available, resubmitting request");
                self.report(
                    pools,
                    CrawlerError::scheduler(format!("couldn't get a downloader: {e}")),
                    None,
                );
                // already recorded as seen, so bypass admission
                self.send(&pools.request, request, token, Some(RESUBMIT_DELAY));
                return;
            }
        };
        let outcome = downloader.download(request).await;
        if let Some(response) = outcome.response {
            self.send(&pools.response, response, token, None);
        }
        if let Some(error) = outcome.error {
            self.report(pools, error, Some(downloader.id()));
        }
    }

    async fn parse_loop(self: Arc<Self>, pools: Pools, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let response = tokio::select! {
                () = token.cancelled() => break,
                got = pools.response.get() => match got {
                    Ok(response) => response,
                    Err(_) => break,
                },
            };
            let _in_hand = self.hold();
            if token.is_cancelled() {
                break;
            }
            self.parse_one(&pools, &token, response).await;
        }
        tracing::debug!("Parse loop exited");
    }

    async fn parse_one(&self, pools: &Pools, token: &CancellationToken, response: Response) {
        let analyzer = match self
            .registry
            .get(ModuleType::Analyzer)
            .and_then(ModuleInstance::into_analyzer)
        {
            Ok(analyzer) => analyzer,
            Err(e) => {
                tracing::warn!(error = %e, "No analyzer available, resubmitting response");
                self.report(
                    pools,
                    CrawlerError::scheduler(format!("couldn't get an analyzer: {e}")),
                    None,
                );
                self.send(&pools.response, response, token, Some(RESUBMIT_DELAY));
                return;
            }
        };
        let analysis = analyzer.analyze(response).await;
        for data in analysis.data {
            match data {
                Data::Request(request) => {
                    // rejections are routine here, check_admission logs them
                    let _ = self.admit(pools, token, request);
                }
                Data::Item(item) => self.send(&pools.item, item, token, None),
            }
        }
        for error in analysis.errors {
            self.report(pools, error, Some(analyzer.id()));
        }
    }

    async fn persist_loop(self: Arc<Self>, pools: Pools, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let item = tokio::select! {
                () = token.cancelled() => break,
                got = pools.item.get() => match got {
                    Ok(item) => item,
                    Err(_) => break,
                },
            };
            let _in_hand = self.hold();
            if token.is_cancelled() {
                break;
            }
            self.persist_one(&pools, &token, item).await;
        }
        tracing::debug!("Persist loop exited");
    }

    async fn persist_one(&self, pools: &Pools, token: &CancellationToken, item: Item) {
        let pipeline = match self
            .registry
            .get(ModuleType::Pipeline)
            .and_then(ModuleInstance::into_pipeline)
        {
            Ok(pipeline) => pipeline,
            Err(e) => {
                tracing::warn!(error = %e, "No pipeline available, resubmitting item");
                self.report(
                    pools,
                    CrawlerError::scheduler(format!("couldn't get a pipeline: {e}")),
                    None,
                );
                self.send(&pools.item, item, token, Some(RESUBMIT_DELAY));
                return;
            }
        };
        for error in pipeline.send(item).await {
            self.report(pools, error, Some(pipeline.id()));
        }
    }
}
