#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::Arc;

use retain_core::engine::{PageScanner, PassSummary, ScanContext, ScanStep};
use retain_core::hash::{HashContext, MapResolver, ResourceResolver};
use retain_core::node::ScanNodeStore;
use retain_core::occurrence::OccurrenceIndex;
use retain_core::page::PageMarks;
use retain_core::phase::{ContentKind, OperatorHooks, ScanLimit, Verdict};
use retain_core::protocol::RasterHandle;
use retain_core::types::{BBox, Operand, ResourceKind, ScanError};
use retain_core::{RetainConfig, RetainEngine};

/// One operator of a scripted page, as an interpreter would see it.
#[derive(Debug, Clone)]
pub enum Step {
    Op {
        op: &'static str,
        operands: Vec<Operand>,
        painted: Option<BBox>,
    },
    /// `Do` on a form XObject: the body runs nested, between the hooks of `Do`.
    Form {
        name: &'static str,
        painted: Option<BBox>,
        body: Vec<Step>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub executed: usize,
    pub skipped: usize,
    pub abandoned: bool,
}

pub fn op(op: &'static str, operands: Vec<Operand>) -> Step {
    Step::Op {
        op,
        operands,
        painted: None,
    }
}

pub fn paint(op: &'static str, operands: Vec<Operand>, bbox: BBox) -> Step {
    Step::Op {
        op,
        operands,
        painted: Some(bbox),
    }
}

pub fn num(value: f64) -> Operand {
    Operand::Real(value)
}

/// `re` + `f`, painting exactly the rectangle.
pub fn fill_rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Step> {
    vec![
        op("re", vec![num(x0), num(y0), num(x1 - x0), num(y1 - y0)]),
        paint("f", vec![], BBox::new(x0, y0, x1, y1)),
    ]
}

/// A text object showing each word on one line starting at (`x`, `y`).
/// Every word paints a 50x12 box.
pub fn text_line(x: f64, y: f64, words: &[&str]) -> Vec<Step> {
    let mut steps = vec![
        op("BT", vec![]),
        op(
            "Tf",
            vec![Operand::Resource(ResourceKind::Font, "F1".into()), Operand::Int(12)],
        ),
        op("Td", vec![num(x), num(y)]),
    ];
    for (i, word) in words.iter().enumerate() {
        let left = x + 50.0 * i as f64;
        steps.push(paint(
            "Tj",
            vec![Operand::Str(word.as_bytes().to_vec())],
            BBox::new(left, y, left + 50.0, y + 12.0),
        ));
    }
    steps.push(op("ET", vec![]));
    steps
}

/// `gs` with a named graphics-state dictionary.
pub fn gs(name: &str) -> Vec<Step> {
    vec![op("gs", vec![Operand::Resource(ResourceKind::ExtGState, name.into())])]
}

pub fn page_of(parts: Vec<Vec<Step>>) -> Vec<Step> {
    parts.into_iter().flatten().collect()
}

pub fn font() -> Operand {
    Operand::dict([
        ("Type", Operand::name("Font")),
        ("Subtype", Operand::name("Type1")),
        ("BaseFont", Operand::name("Helvetica")),
    ])
}

pub fn form_xobject(content: &[u8]) -> Operand {
    Operand::stream(
        [
            ("Type", Operand::name("XObject")),
            ("Subtype", Operand::name("Form")),
            (
                "BBox",
                Operand::Array(vec![num(0.0), num(0.0), num(100.0), num(100.0)]),
            ),
        ],
        content.to_vec(),
    )
}

pub fn map_resolver() -> MapResolver {
    let mut resolver = MapResolver::new();
    resolver
        .insert_resource(ResourceKind::Font, "F1", font())
        .insert_resource(ResourceKind::XObject, "Fm1", form_xobject(b"0 0 10 10 re f"))
        .insert_resource(
            ResourceKind::ExtGState,
            "Translucent",
            Operand::dict([("ca", num(0.5)), ("BM", Operand::name("Multiply"))]),
        )
        .insert_resource(
            ResourceKind::ExtGState,
            "Opaque",
            Operand::dict([("ca", num(1.0)), ("BM", Operand::name("Normal"))]),
        )
        .insert_resource(ResourceKind::ExtGState, "Thick", Operand::dict([("LW", num(4.0))]));
    resolver
}

pub fn resolver() -> Arc<dyn ResourceResolver> {
    Arc::new(map_resolver())
}

/// Walk `steps` the way an interpreter would, honouring each verdict.
pub fn run<H>(hooks: &mut H, steps: &[Step]) -> Result<Outcome, H::Error>
where
    H: OperatorHooks,
    H::Error: Debug,
{
    let mut outcome = Outcome::default();
    walk(hooks, steps, &mut outcome)?;
    Ok(outcome)
}

fn walk<H: OperatorHooks>(
    hooks: &mut H,
    steps: &[Step],
    outcome: &mut Outcome,
) -> Result<(), H::Error> {
    for step in steps {
        let (op, operands, painted) = match step {
            Step::Op {
                op,
                operands,
                painted,
            } => (*op, operands.clone(), *painted),
            Step::Form { name, painted, .. } => (
                "Do",
                vec![Operand::Resource(ResourceKind::XObject, (*name).into())],
                *painted,
            ),
        };
        match hooks.before_operator(op, &operands)? {
            Verdict::AbandonPass => {
                outcome.abandoned = true;
                return Ok(());
            }
            Verdict::Skip => {
                outcome.skipped += 1;
                hooks.after_operator(op, None)?;
            }
            Verdict::Execute => {
                outcome.executed += 1;
                if let Step::Form { body, .. } = step {
                    hooks.enter_content(ContentKind::Form)?;
                    walk(hooks, body, outcome)?;
                    hooks.exit_content()?;
                    if outcome.abandoned {
                        return Ok(());
                    }
                }
                hooks.after_operator(op, painted)?;
            }
        }
    }
    Ok(())
}

/// Adapter that drives a bare [`PageScanner`] without an engine.
pub struct ScanHooks<'c> {
    pub scanner: PageScanner,
    pub ctx: ScanContext<'c>,
}

impl OperatorHooks for ScanHooks<'_> {
    type Error = ScanError;

    fn before_operator(&mut self, op: &str, operands: &[Operand]) -> Result<Verdict, ScanError> {
        Ok(match self.scanner.operator(&mut self.ctx, op, operands)? {
            ScanStep::Continue => Verdict::Execute,
            ScanStep::Unsupported => Verdict::AbandonPass,
        })
    }

    fn after_operator(&mut self, _op: &str, painted: Option<BBox>) -> Result<(), ScanError> {
        self.scanner.painted(&mut self.ctx, painted)
    }

    fn enter_content(&mut self, kind: ContentKind) -> Result<(), ScanError> {
        self.scanner.enter_content(kind);
        Ok(())
    }

    fn exit_content(&mut self) -> Result<(), ScanError> {
        self.scanner.exit_content();
        Ok(())
    }
}

/// Job-wide scan state for tests that work below the engine.
pub struct Job {
    pub config: RetainConfig,
    pub store: ScanNodeStore,
    pub occurrences: OccurrenceIndex,
    pub hashing: HashContext,
    pub limit: ScanLimit,
}

impl Job {
    pub fn new(config: RetainConfig) -> Self {
        Job {
            store: ScanNodeStore::new(config.max_scan_nodes),
            occurrences: OccurrenceIndex::new(),
            hashing: HashContext::new(&config),
            limit: ScanLimit::disabled(),
            config,
        }
    }

    pub fn scan(&mut self, index: u32, steps: &[Step]) -> PageMarks {
        self.hashing.begin_page();
        let mut hooks = ScanHooks {
            scanner: PageScanner::new(index, resolver(), &self.config),
            ctx: ScanContext {
                store: &mut self.store,
                occurrences: &mut self.occurrences,
                hashing: &mut self.hashing,
                limit: &mut self.limit,
            },
        };
        let outcome = run(&mut hooks, steps).unwrap();
        assert!(!outcome.abandoned, "page {index} was abandoned");
        let ScanHooks { scanner, mut ctx } = hooks;
        scanner.finish(&mut ctx).unwrap()
    }
}

pub fn connected_engine(config: RetainConfig, store: Arc<dyn retain_core::protocol::CacheStore>) -> RetainEngine {
    let mut engine = RetainEngine::new(config, store).unwrap();
    engine.connect().unwrap();
    engine
}

pub fn scan_page(engine: &mut RetainEngine, page: u32, steps: &[Step]) -> Outcome {
    engine.begin_page(page, resolver()).unwrap();
    let outcome = run(engine, steps).unwrap();
    engine.end_page().unwrap();
    outcome
}

/// Run every planned pass of `page`. Store/Export passes hand back a raster.
pub fn produce_page(engine: &mut RetainEngine, page: u32, steps: &[Step]) -> Vec<PassSummary> {
    let passes = engine.page_plan(page).expect("page has no plan").passes.len();
    let mut summaries = Vec::with_capacity(passes);
    for index in 0..passes {
        let action = engine.begin_pass(page, index).unwrap();
        run(engine, steps).unwrap();
        let raster = action
            .produces_raster()
            .then(|| (RasterHandle(u64::from(page) * 1000 + index as u64), 4096));
        summaries.push(engine.end_pass(raster).unwrap());
    }
    summaries
}
