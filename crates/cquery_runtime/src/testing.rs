//! In-memory collaborators for tests.

use crate::plan::{BasketCatalog, BasketInfo, BasketRef, Compiler, FiringContext, Plan, PlanError};
use cquery_core::{BasketKey, TransitionKey};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Catalog backed by a map
#[derive(Default)]
pub struct MemoryCatalog {
    baskets: Mutex<HashMap<BasketKey, BasketInfo>>,
    refuse_registration: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_registration(self) -> Self {
        self.refuse_registration.store(true, Ordering::SeqCst);
        self
    }

    pub fn insert(&self, key: BasketKey, info: BasketInfo) {
        self.baskets.lock().unwrap().insert(key, info);
    }

    pub fn add_basket(&self, schema: &str, table: &str, rows: u64, window: u64, stride: u64) {
        self.insert(
            BasketKey::new(schema, table),
            BasketInfo {
                row_count: rows,
                window,
                stride,
                columns: vec!["id".to_string(), "value".to_string()],
            },
        );
    }

    pub fn set_rows(&self, schema: &str, table: &str, rows: u64) {
        let mut baskets = self.baskets.lock().unwrap();
        if let Some(info) = baskets.get_mut(&BasketKey::new(schema, table)) {
            info.row_count = rows;
        }
    }

    pub fn remove(&self, schema: &str, table: &str) {
        self.baskets.lock().unwrap().remove(&BasketKey::new(schema, table));
    }
}

impl BasketCatalog for MemoryCatalog {
    fn basket(&self, key: &BasketKey) -> Option<BasketInfo> {
        self.baskets.lock().unwrap().get(key).cloned()
    }

    fn register_basket(&self, key: &BasketKey) -> Result<BasketInfo, PlanError> {
        if self.refuse_registration.load(Ordering::SeqCst) {
            return Err(PlanError::new(format!("no stream table {}", key)));
        }
        let info = BasketInfo {
            row_count: 0,
            window: 0,
            stride: 0,
            columns: vec!["id".to_string()],
        };
        self.insert(key.clone(), info.clone());
        Ok(info)
    }
}

/// Blocks plan runs until opened
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
            entered: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// Detects two plans touching the same basket at the same time
#[derive(Default)]
pub struct OverlapProbe {
    busy: Mutex<HashSet<BasketKey>>,
    violations: AtomicUsize,
    peak: AtomicUsize,
    active: AtomicUsize,
}

impl OverlapProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    /// Highest number of plans observed running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, baskets: &[BasketRef]) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let mut busy = self.busy.lock().unwrap();
        for r in baskets {
            if !busy.insert(r.basket.clone()) {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn leave(&self, baskets: &[BasketRef]) {
        let mut busy = self.busy.lock().unwrap();
        for r in baskets {
            busy.remove(&r.basket);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plan whose behaviour is set by the test
pub struct ScriptedPlan {
    baskets: Vec<BasketRef>,
    runs: AtomicU64,
    failure: Mutex<Option<String>>,
    work: Duration,
    gate: Option<Arc<Gate>>,
    probe: Option<Arc<OverlapProbe>>,
}

impl ScriptedPlan {
    pub fn new(baskets: Vec<BasketRef>) -> Self {
        Self {
            baskets,
            runs: AtomicU64::new(0),
            failure: Mutex::new(None),
            work: Duration::ZERO,
            gate: None,
            probe: None,
        }
    }

    pub fn failing(self, message: &str) -> Self {
        *self.failure.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_probe(mut self, probe: Arc<OverlapProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Plan for ScriptedPlan {
    fn baskets(&self) -> Vec<BasketRef> {
        self.baskets.clone()
    }

    fn run(&self, _ctx: &FiringContext) -> Result<(), PlanError> {
        if let Some(probe) = &self.probe {
            probe.enter(&self.baskets);
        }
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        if let Some(probe) = &self.probe {
            probe.leave(&self.baskets);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(PlanError(message)),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        self.baskets
            .iter()
            .map(|r| format!("{} {}", r.direction, r.basket))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Compiler serving pre-built plans
#[derive(Default)]
pub struct MapCompiler {
    plans: Mutex<HashMap<TransitionKey, Arc<ScriptedPlan>>>,
}

impl MapCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, schema: &str, function: &str, plan: ScriptedPlan) -> Arc<ScriptedPlan> {
        let plan = Arc::new(plan);
        self.plans
            .lock()
            .unwrap()
            .insert(TransitionKey::new(schema, function), plan.clone());
        plan
    }
}

impl Compiler for MapCompiler {
    fn compile(&self, schema: &str, function: &str) -> Result<Arc<dyn Plan>, PlanError> {
        let plans = self.plans.lock().unwrap();
        match plans.get(&TransitionKey::new(schema, function)) {
            Some(plan) => Ok(plan.clone() as Arc<dyn Plan>),
            None => Err(PlanError::from("SQL procedure missing")),
        }
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Install a test subscriber once; RUST_LOG controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
