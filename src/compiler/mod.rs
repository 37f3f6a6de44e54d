//! # Region Extraction Pass
//!
//! Finds memory accesses through distributed-global pointers, grows each
//! into the largest region that can run on the core owning that pointer,
//! and relocates the region into a function invoked remotely through the
//! runtime's `call_on` primitive.
//!
//! ## Architecture
//!
//! ```text
//! task functions → provenance → anchors → grow regions → extract → verify
//!        ↑                                                   │
//!        └──────────────── direct callees ◄──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use dsm_extract::compiler::{ExtractorOptions, ExtractorPass};
//!
//! let pass = ExtractorPass::new(ExtractorOptions::default());
//! let report = pass.run(&mut module)?;
//! println!("{}", report.to_json()?);
//! ```

pub mod debug;
pub mod extract;
pub mod ir;
pub mod provenance;
pub mod region;
pub mod verifier;

pub use debug::{dump_function, format_function, format_inst, regions_to_dot};
pub use extract::{extract_region, Extraction, RuntimePrimitives};
pub use provenance::{analyze_provenance, is_anchor, provenance_of, search};
pub use region::{CandidateRegion, PassContext, RegionId, Relocation, UniqueQueue};
pub use verifier::{DominatorTree, Verifier, VerifyError, VerifyResult};

use crate::{Error, Result};
use ir::{FuncId, Module, PointerClass, RootInfo};
use region::describe;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How extracted code is verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Skip verification entirely
    Skip,
    /// Record verification failures as report warnings and continue
    Warn,
    /// Fail the run on any verification error
    #[default]
    Require,
}

/// Extraction options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorOptions {
    /// Symbol of `resolve_owning_core(ptr addrspace(global)) -> i16`
    pub owning_core_symbol: String,
    /// Symbol of `call_on(core, fn, in, in_size, out, out_size) -> i16`
    pub call_on_symbol: String,
    /// Grow and report regions without rewriting the module
    pub analysis_only: bool,
    /// Also grow regions from stack-rooted anchors
    pub grow_stack_anchors: bool,
    /// Functions processed as roots in addition to task functions
    pub extra_roots: Vec<String>,
    /// Verification of every function touched by an extraction
    pub verification_mode: VerificationMode,
    /// Log a Graphviz rendering of each processed function's regions
    pub dump_dot: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            owning_core_symbol: "resolve_owning_core".to_string(),
            call_on_symbol: "call_on".to_string(),
            analysis_only: false,
            grow_stack_anchors: false,
            extra_roots: Vec::new(),
            verification_mode: VerificationMode::Require,
            dump_dot: false,
        }
    }
}

impl ExtractorOptions {
    /// Parses options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))
    }
}

/// One grown region
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    /// Region id
    pub id: RegionId,
    /// Function the region was grown in
    pub function: String,
    /// Anchor the region was grown from
    pub entry: String,
    /// Storage class of the target pointer's root
    pub target_class: PointerClass,
    /// Instructions claimed during growth
    pub members: usize,
    /// Exit edges
    pub exits: usize,
    /// Name of the extracted function, if the region was relocated
    pub extracted: Option<String>,
    /// Values marshaled into the region
    pub inputs: usize,
    /// Values marshaled out of the region
    pub outputs: usize,
}

/// Kind of a non-fatal finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// An anchor was already owned by an earlier region
    ClaimedAnchor,
    /// Runtime primitives are missing; nothing was rewritten
    MissingPrimitives,
}

/// Non-fatal finding recorded during a run
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Kind of finding
    pub kind: DiagnosticKind,
    /// Function concerned, if any
    pub function: Option<String>,
    /// Human-readable description
    pub message: String,
}

/// Outcome of one pass run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    /// Module identifier
    pub module: String,
    /// No rewriting took place
    pub analysis_only: bool,
    /// Functions processed, in processing order
    pub functions: Vec<String>,
    /// Grown regions, in creation order
    pub regions: Vec<RegionReport>,
    /// Non-fatal findings
    pub diagnostics: Vec<Diagnostic>,
    /// Verification warnings
    pub warnings: Vec<String>,
}

impl ExtractionReport {
    /// Pretty-printed JSON rendering
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::runtime(e.to_string()))
    }

    /// Names of the functions created by extraction
    pub fn extracted_functions(&self) -> Vec<&str> {
        self.regions
            .iter()
            .filter_map(|r| r.extracted.as_deref())
            .collect()
    }
}

/// The region extraction pass
pub struct ExtractorPass {
    options: ExtractorOptions,
}

impl ExtractorPass {
    /// Create a pass with options
    pub fn new(options: ExtractorOptions) -> Self {
        Self { options }
    }

    /// Options in effect
    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    /// Runs the pass over `module`, rewriting it unless the runtime
    /// primitives are missing or analysis-only mode is set
    pub fn run(&self, module: &mut Module) -> Result<ExtractionReport> {
        let mut report = ExtractionReport {
            module: module.name.clone(),
            ..ExtractionReport::default()
        };

        let primitives = if self.options.analysis_only {
            None
        } else {
            let found = RuntimePrimitives::find(module, &self.options);
            if found.is_none() {
                warn!(
                    owning_core = %self.options.owning_core_symbol,
                    call_on = %self.options.call_on_symbol,
                    "runtime primitives not found, running analysis only"
                );
                report.diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::MissingPrimitives,
                    function: None,
                    message: format!(
                        "{} or {} is not declared",
                        self.options.owning_core_symbol, self.options.call_on_symbol
                    ),
                });
            }
            found
        };
        report.analysis_only = primitives.is_none();

        let excluded: HashSet<FuncId> = primitives
            .iter()
            .flat_map(|p| [p.owning_core, p.call_on])
            .collect();

        let mut ctx = PassContext::new();
        let mut queue = UniqueQueue::new();
        for func in module.function_ids() {
            let function = module.function(func);
            if function.attrs.task || self.options.extra_roots.contains(&function.name) {
                queue.push(func);
            }
        }

        while let Some(func) = queue.pop() {
            if module.function(func).is_declaration() {
                continue;
            }
            let name = module.function(func).name.clone();
            info!(function = %name, "processing function");
            report.functions.push(name.clone());

            let regions = self.grow_regions(module, func, &mut ctx, &mut report)?;

            for callee in module.direct_callees(func) {
                if !excluded.contains(&callee) && !module.function(callee).is_declaration() {
                    queue.push(callee);
                }
            }

            if self.options.dump_dot {
                debug!(function = %name, dot = %regions_to_dot(module, func, &ctx), "regions");
            }

            match &primitives {
                Some(primitives) => {
                    self.extract_all(module, func, regions, primitives, &mut report)?
                }
                None => {
                    for region in &regions {
                        report.regions.push(region_report(module, region, None));
                    }
                }
            }
        }

        info!(
            functions = report.functions.len(),
            regions = report.regions.len(),
            extracted = report.extracted_functions().len(),
            "extraction finished"
        );
        Ok(report)
    }

    fn grow_regions(
        &self,
        module: &mut Module,
        func: FuncId,
        ctx: &mut PassContext,
        report: &mut ExtractionReport,
    ) -> Result<Vec<CandidateRegion>> {
        let anchors = analyze_provenance(module, func);
        debug!(function = %module.function(func).name, anchors = anchors.len(), "provenance analyzed");

        let mut regions = Vec::new();
        for anchor in anchors {
            if let Some(owner) = ctx.owner(anchor) {
                info!(anchor = %describe(module, anchor), owner, "anchor already claimed");
                report.diagnostics.push(Diagnostic {
                    kind: DiagnosticKind::ClaimedAnchor,
                    function: Some(module.function(func).name.clone()),
                    message: format!(
                        "anchor {} already belongs to region {}",
                        describe(module, anchor),
                        owner
                    ),
                });
                continue;
            }
            let Some(root) = provenance_of(module, anchor) else {
                continue;
            };
            let info = RootInfo::of(module, func, root);
            let grows = info.is_global_ptr() || (self.options.grow_stack_anchors && info.is_stack());
            if !grows {
                continue;
            }

            let mut region = CandidateRegion::new(ctx.next_region_id(), func, anchor, root);
            region.expand(module, ctx)?;
            region.verify_ownership(module, ctx)?;
            region.log_header(module);
            regions.push(region);
        }
        Ok(regions)
    }

    fn extract_all(
        &self,
        module: &mut Module,
        func: FuncId,
        regions: Vec<CandidateRegion>,
        primitives: &RuntimePrimitives,
        report: &mut ExtractionReport,
    ) -> Result<()> {
        let mut relocations: Vec<Relocation> = Vec::new();
        for mut region in regions {
            for relocation in &relocations {
                region.apply_relocation(relocation);
            }
            let mut summary = region_report(module, &region, None);
            let extraction = extract_region(module, &region, primitives)?;

            summary.extracted = Some(module.function(extraction.function).name.clone());
            summary.inputs = extraction.inputs.len();
            summary.outputs = extraction.outputs.len();
            report.regions.push(summary);

            self.verify(module, extraction.function, report)?;
            relocations.push(extraction.relocation);
        }
        if !relocations.is_empty() {
            self.verify(module, func, report)?;
        }
        Ok(())
    }

    fn verify(&self, module: &Module, func: FuncId, report: &mut ExtractionReport) -> Result<()> {
        if self.options.verification_mode == VerificationMode::Skip {
            return Ok(());
        }
        let result = Verifier::new().verify(module, func);
        let name = &module.function(func).name;
        for warning in &result.warnings {
            report.warnings.push(format!("{}: {}", name, warning));
        }
        if result.valid {
            return Ok(());
        }
        let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
        match self.options.verification_mode {
            VerificationMode::Require => Err(Error::invalid_ir(format!(
                "verification of {} failed: {}",
                name,
                messages.join("; ")
            ))),
            _ => {
                for message in messages {
                    warn!(function = %name, "{}", message);
                    report.warnings.push(format!("{}: {}", name, message));
                }
                Ok(())
            }
        }
    }
}

fn region_report(
    module: &Module,
    region: &CandidateRegion,
    extracted: Option<String>,
) -> RegionReport {
    RegionReport {
        id: region.id,
        function: module.function(region.func).name.clone(),
        entry: describe(module, region.entry),
        target_class: RootInfo::of(module, region.func, region.target_ptr).class(),
        members: region.members.len(),
        exits: region.exits.len(),
        extracted,
        inputs: 0,
        outputs: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ir::{Builder, Type, Value};

    fn task_module(with_primitives: bool) -> Module {
        let mut module = Module::new("test");
        if with_primitives {
            RuntimePrimitives::declare(&mut module, &ExtractorOptions::default());
        }
        let f = module.add_function("bump", vec![Type::global_ptr()], Type::I64);
        module.function_mut(f).attrs.task = true;
        let entry = module.add_block(f, "entry");
        let mut b = Builder::new(&mut module, f);
        b.position_at_end(entry);
        let v = b.load(Type::I64, Value::Arg(0), "v");
        let next = b.add(v, Value::i64(1), "next");
        b.store(next, Value::Arg(0));
        b.ret(Some(next));
        module
    }

    #[test]
    fn test_default_options() {
        let options = ExtractorOptions::default();
        assert_eq!(options.call_on_symbol, "call_on");
        assert!(!options.grow_stack_anchors);
        assert_eq!(options.verification_mode, VerificationMode::Require);
    }

    #[test]
    fn test_options_from_json() {
        let options =
            ExtractorOptions::from_json(r#"{"call_on_symbol": "remote", "verification_mode": "warn"}"#)
                .unwrap();
        assert_eq!(options.call_on_symbol, "remote");
        assert_eq!(options.owning_core_symbol, "resolve_owning_core");
        assert_eq!(options.verification_mode, VerificationMode::Warn);
        assert!(matches!(
            ExtractorOptions::from_json("{\"analysis_only\": 3}"),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_run_extracts_task_region() {
        let mut module = task_module(true);
        let report = ExtractorPass::new(ExtractorOptions::default())
            .run(&mut module)
            .unwrap();
        assert!(!report.analysis_only);
        assert_eq!(report.functions, vec!["bump".to_string()]);
        assert_eq!(report.extracted_functions(), vec!["bump.d0"]);
        assert_eq!(report.regions[0].outputs, 1);
        assert!(module.function_by_name("bump.d0").is_some());
    }

    #[test]
    fn test_run_without_primitives_is_analysis_only() {
        let mut module = task_module(false);
        let before = module.insts.len();
        let report = ExtractorPass::new(ExtractorOptions::default())
            .run(&mut module)
            .unwrap();
        assert!(report.analysis_only);
        assert_eq!(report.regions.len(), 1);
        assert!(report.regions[0].extracted.is_none());
        assert_eq!(module.insts.len(), before);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::MissingPrimitives));
        assert!(report.to_json().unwrap().contains("\"analysis_only\": true"));
    }
}
