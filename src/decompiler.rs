//! Decompiler entry point.
//!
//! The [`Decompiler`] runs the whole pipeline on a function: IL reading,
//! transforms, statement building, layout and sequence points.
//!
//! ```text
//! RawMethodBody ──read──▶ Function ──PassScheduler──▶ Function
//!                                                        │
//!                     StatementBuilder ◀─────────────────┘
//!                            │
//!                  assign_positions ──▶ SequencePointBuilder
//!                            │                  │
//!                            ▼                  ▼
//!                      DecompiledFunction { body, sequence_points, events }
//! ```
//!
//! Functions are independent: [`Decompiler::decompile_all`] processes them in
//! parallel and a failure in one never affects another.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use rayon::prelude::*;

use crate::{
    ast::{assign_positions, BlockStatement, SequencePointBuilder, SequencePoints, StatementBuilder},
    compiler::{DecompilerSettings, DerivedStats, EventKind, EventLog, PassScheduler, TransformContext},
    il::{read_function, Function, RawMethodBody},
    typesystem::TypeSystem,
    utils::CancellationToken,
    Result,
};

/// Output for one function.
#[derive(Debug)]
pub struct DecompiledFunction {
    /// The transformed instruction tree.
    pub function: Function,
    /// The reconstructed statement tree, with positions assigned.
    pub body: BlockStatement,
    /// Source mapping of `body`, ordered by IL offset.
    pub sequence_points: SequencePoints,
    /// What the transforms did.
    pub events: EventLog,
    /// How many times the block stage ran.
    pub block_runs: usize,
    /// Wall time spent on this function.
    pub elapsed: Duration,
}

impl DecompiledFunction {
    /// Name of the decompiled function.
    #[must_use]
    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Transform statistics for this function.
    #[must_use]
    pub fn stats(&self) -> DerivedStats {
        DerivedStats::from_log(&self.events).with_time(self.elapsed)
    }
}

/// Main decompiler.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use dotlift::{CancellationToken, Decompiler};
/// use dotlift::typesystem::SimpleTypeSystem;
///
/// let decompiler = Decompiler::new(Arc::new(SimpleTypeSystem::new()));
/// let result = decompiler.decompile_body(&raw_body, &CancellationToken::new())?;
/// for point in result.sequence_points.iter() {
///     println!("IL_{:04x} -> line {}", point.il_offset, point.start_line);
/// }
/// ```
pub struct Decompiler {
    type_system: Arc<dyn TypeSystem>,
    settings: DecompilerSettings,
}

impl Decompiler {
    /// Creates a decompiler with default settings.
    #[must_use]
    pub fn new(type_system: Arc<dyn TypeSystem>) -> Self {
        Self::with_settings(type_system, DecompilerSettings::default())
    }

    /// Creates a decompiler with the given settings.
    #[must_use]
    pub fn with_settings(type_system: Arc<dyn TypeSystem>, settings: DecompilerSettings) -> Self {
        Decompiler {
            type_system,
            settings,
        }
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &DecompilerSettings {
        &self.settings
    }

    /// Decompiles one function.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] if `cancel` was triggered, or the
    /// first transform failure.
    pub fn decompile(&self, mut function: Function, cancel: &CancellationToken) -> Result<DecompiledFunction> {
        let start = Instant::now();
        let events = EventLog::new();
        let name = function.name().to_string();
        let ts: &dyn TypeSystem = self.type_system.as_ref();

        let block_runs = {
            let ctx = TransformContext::new(&name, ts, &self.settings, &events, cancel);
            PassScheduler::standard(&self.settings).run(&mut function, &ctx)?
        };
        cancel.check()?;

        let mut body = StatementBuilder::new(&function, ts).build();
        assign_positions(&mut body);
        let sequence_points = SequencePointBuilder::build(&function, &body);

        events
            .record(EventKind::FunctionCompleted)
            .function(&name)
            .message(format!(
                "{} statements, {} sequence points",
                body.statement_count(),
                sequence_points.len()
            ));
        let elapsed = start.elapsed();
        log::debug!(
            "decompiled {} in {:?}: {} block runs, {} events, {} warnings",
            name,
            elapsed,
            block_runs,
            events.len(),
            events.warnings().count()
        );

        Ok(DecompiledFunction {
            function,
            body,
            sequence_points,
            events,
            block_runs,
            elapsed,
        })
    }

    /// Reads a raw method body and decompiles it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an inconsistent IL stream, or
    /// any error of [`Decompiler::decompile`].
    pub fn decompile_body(&self, body: &RawMethodBody, cancel: &CancellationToken) -> Result<DecompiledFunction> {
        let function = read_function(body)?;
        self.decompile(function, cancel)
    }

    /// Decompiles many functions, in parallel unless disabled in the settings.
    ///
    /// Results are returned in input order, one per function.
    pub fn decompile_all(
        &self,
        functions: Vec<Function>,
        cancel: &CancellationToken,
    ) -> Vec<Result<DecompiledFunction>> {
        let run = |function: Function| {
            let name = function.name().to_string();
            let result = self.decompile(function, cancel);
            if let Err(e) = &result {
                log::warn!("failed to decompile {}: {}", name, e);
            }
            result
        };
        if self.settings.parallel {
            functions.into_par_iter().map(run).collect()
        } else {
            functions.into_iter().map(run).collect()
        }
    }

    /// Statistics over a batch from [`Decompiler::decompile_all`].
    ///
    /// Each failed function counts as one error; times are summed.
    #[must_use]
    pub fn batch_stats(results: &[Result<DecompiledFunction>]) -> DerivedStats {
        let log = EventLog::new();
        let mut elapsed = Duration::ZERO;
        for result in results {
            match result {
                Ok(function) => {
                    log.merge(&function.events);
                    elapsed += function.elapsed;
                }
                Err(e) => log.error(e.to_string()),
            }
        }
        DerivedStats::from_log(&log).with_time(elapsed)
    }
}
