use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::limit::{Limit, ScopeStat};
use crate::{Config, RcmgrError, Result};

struct ScopeInner {
    name: String,
    limit: Limit,
    parent: Option<Arc<ScopeInner>>,
    state: Mutex<ScopeState>,
}

#[derive(Debug, Default)]
struct ScopeState {
    used: ScopeStat,
    closed: bool,
    open_spans: i64,
    reserve_count: u64,
    release_count: u64,
}

impl ScopeInner {
    fn new(name: &str, limit: Limit, parent: Option<Arc<ScopeInner>>) -> Self {
        Self {
            name: name.to_string(),
            limit,
            parent,
            state: Mutex::new(ScopeState::default()),
        }
    }

    // A panic while holding the lock leaves plain counters behind, so the poisoned state is still usable.
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Point-in-time view of a scope's accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSnapshot {
    pub name: String,
    pub limit: Limit,
    pub used: ScopeStat,
    pub open_spans: i64,
    pub reserve_count: u64,
    pub release_count: u64,
    pub closed: bool,
}

/// Owns the system scope. Service scopes opened here reserve against both
/// their own limit and the system limit.
pub struct ResourceManager {
    system: Arc<ScopeInner>,
    service_limit: Limit,
}

impl ResourceManager {
    pub fn new(config: Config) -> Self {
        Self {
            system: Arc::new(ScopeInner::new("system", config.system_limit, None)),
            service_limit: config.service_limit,
        }
    }

    pub fn open_service(&self, name: &str) -> ResourceScope {
        tracing::info!("Opening resource scope {} with limit {}", name, self.service_limit);
        ResourceScope {
            inner: Arc::new(ScopeInner::new(name, self.service_limit, Some(self.system.clone()))),
        }
    }

    pub fn system_remaining(&self) -> Limit {
        let state = self.system.lock();
        self.system.limit.remaining_after(&state.used)
    }
}

/// A named accounting scope shared by all workers of one service.
#[derive(Clone)]
pub struct ResourceScope {
    inner: Arc<ScopeInner>,
}

impl ResourceScope {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn begin_span(&self) -> Result<ResourceScopeSpan> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(RcmgrError::ScopeClosed(self.inner.name.clone()));
        }
        state.open_spans += 1;
        Ok(ResourceScopeSpan {
            id: Uuid::new_v4(),
            scope: self.inner.clone(),
            reserved: ScopeStat::default(),
            reservations: 0,
            finished: false,
        })
    }

    /// Remaining capacity, bounded by the parent's remaining capacity.
    pub fn remaining(&self) -> Limit {
        let state = self.inner.lock();
        let mut remaining = self.inner.limit.remaining_after(&state.used);
        if let Some(parent) = &self.inner.parent {
            let parent_state = parent.lock();
            let parent_remaining = parent.limit.remaining_after(&parent_state.used);
            remaining.memory = remaining.memory.min(parent_remaining.memory);
            remaining.tasks_total = remaining.tasks_total.min(parent_remaining.tasks_total);
            remaining.tasks_high = remaining.tasks_high.min(parent_remaining.tasks_high);
            remaining.tasks_medium = remaining.tasks_medium.min(parent_remaining.tasks_medium);
            remaining.tasks_low = remaining.tasks_low.min(parent_remaining.tasks_low);
        }
        remaining
    }

    pub fn limit(&self) -> Limit {
        self.inner.limit
    }

    pub fn stat(&self) -> ScopeSnapshot {
        let state = self.inner.lock();
        ScopeSnapshot {
            name: self.inner.name.clone(),
            limit: self.inner.limit,
            used: state.used,
            open_spans: state.open_spans,
            reserve_count: state.reserve_count,
            release_count: state.release_count,
            closed: state.closed,
        }
    }

    /// Closes the scope and hands every outstanding reservation back to the
    /// parent. Spans still alive afterwards release nothing.
    pub fn release(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(parent) = &self.inner.parent {
            parent.lock().used.saturating_sub(&state.used);
        }
        if state.open_spans > 0 {
            tracing::warn!(
                "Released resource scope {} with {} open spans ({})",
                self.inner.name,
                state.open_spans,
                state.used
            );
        }
        state.used = ScopeStat::default();
        tracing::info!("Resource scope {} released", self.inner.name);
    }
}

/// Reservations held by one unit of work. Dropping the span releases them.
pub struct ResourceScopeSpan {
    id: Uuid,
    scope: Arc<ScopeInner>,
    reserved: ScopeStat,
    reservations: u64,
    finished: bool,
}

impl ResourceScopeSpan {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reserved(&self) -> ScopeStat {
        self.reserved
    }

    pub fn reserve(&mut self, stat: &ScopeStat) -> Result<()> {
        if self.finished {
            return Err(RcmgrError::ScopeClosed(format!("{} span {}", self.scope.name, self.id)));
        }
        let mut state = self.scope.lock();
        if state.closed {
            return Err(RcmgrError::ScopeClosed(self.scope.name.clone()));
        }
        self.scope.limit.check_fits(&self.scope.name, &state.used, stat)?;
        if let Some(parent) = &self.scope.parent {
            let mut parent_state = parent.lock();
            parent.limit.check_fits(&parent.name, &parent_state.used, stat)?;
            parent_state.used += stat;
        }
        state.used += stat;
        state.reserve_count += 1;
        self.reserved += stat;
        self.reservations += 1;
        Ok(())
    }

    pub fn done(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut state = self.scope.lock();
        if !state.closed {
            state.used.saturating_sub(&self.reserved);
            if let Some(parent) = &self.scope.parent {
                parent.lock().used.saturating_sub(&self.reserved);
            }
        }
        state.release_count += self.reservations;
        state.open_spans -= 1;
    }
}

impl Drop for ResourceScopeSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReserveTaskPriority;

    fn manager(memory: i64, tasks: i64) -> ResourceManager {
        ResourceManager::new(Config {
            system_limit: Limit::new(memory * 2, tasks * 2, tasks * 2, tasks * 2, tasks * 2),
            service_limit: Limit::new(memory, tasks, tasks, tasks, tasks),
        })
    }

    #[test]
    fn test_reserve_and_done_balance() {
        let scope = manager(1024, 2).open_service("executor");
        let mut span = scope.begin_span().unwrap();
        span.reserve(&ScopeStat::for_task(512, ReserveTaskPriority::High)).unwrap();
        assert_eq!(scope.remaining().memory, 512);
        assert_eq!(scope.remaining().tasks_total, 1);

        span.done();
        let stat = scope.stat();
        assert_eq!(stat.used, ScopeStat::default());
        assert_eq!(stat.reserve_count, stat.release_count);
        assert_eq!(stat.open_spans, 0);
    }

    #[test]
    fn test_drop_releases_span() {
        let scope = manager(1024, 2).open_service("executor");
        {
            let mut span = scope.begin_span().unwrap();
            span.reserve(&ScopeStat::for_task(100, ReserveTaskPriority::Low)).unwrap();
        }
        assert_eq!(scope.remaining().memory, 1024);
        assert_eq!(scope.stat().release_count, 1);
    }

    #[test]
    fn test_exhausted_reservation_leaves_usage_untouched() {
        let scope = manager(1024, 1).open_service("executor");
        let mut first = scope.begin_span().unwrap();
        first.reserve(&ScopeStat::for_task(10, ReserveTaskPriority::Medium)).unwrap();

        let mut second = scope.begin_span().unwrap();
        let err = second
            .reserve(&ScopeStat::for_task(10, ReserveTaskPriority::Medium))
            .unwrap_err();
        assert!(matches!(err, RcmgrError::ResourceExhausted { .. }));
        assert_eq!(scope.stat().used.memory, 10);
    }

    #[test]
    fn test_release_returns_reservations_to_parent() {
        let rm = manager(1024, 4);
        let scope = rm.open_service("executor");
        let mut span = scope.begin_span().unwrap();
        span.reserve(&ScopeStat::for_task(256, ReserveTaskPriority::Low)).unwrap();
        assert_eq!(rm.system_remaining().memory, 2048 - 256);

        scope.release();
        assert_eq!(rm.system_remaining().memory, 2048);
        assert!(matches!(scope.begin_span(), Err(RcmgrError::ScopeClosed(_))));

        // late drop must not double count
        drop(span);
        assert_eq!(rm.system_remaining().memory, 2048);
    }

    #[test]
    fn test_panic_releases_span() {
        let scope = manager(1024, 4).open_service("executor");
        let cloned = scope.clone();
        let result = std::thread::spawn(move || {
            let mut span = cloned.begin_span().unwrap();
            span.reserve(&ScopeStat::for_task(64, ReserveTaskPriority::High)).unwrap();
            panic!("worker failed");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(scope.stat().used, ScopeStat::default());
        assert_eq!(scope.stat().open_spans, 0);
    }
}
