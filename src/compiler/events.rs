//! Event recording for the transform pipeline.
//!
//! Every transform that changes a function records what it did in an
//! [`EventLog`]. The log is the observable record of a decompilation: tests
//! assert on it, hosts print its summary, and the per-function logs of a
//! [`crate::Decompiler::decompile_all`] run can be merged into one.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Append-only collection with query and summary helpers
//! - [`EventBuilder`] - Fluent construction, pushed into the log on drop
//! - [`DerivedStats`] - Counters computed from a log
//!
//! # Example
//!
//! ```rust,ignore
//! use dotlift::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::CompoundAssignment)
//!     .at("Counter.Increment", 0x0c)
//!     .pass("TransformAssignment")
//!     .message("Count += 1");
//! println!("{}", log.summary());
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A store was folded into its use as an inline assignment.
    InlineAssignment,
    /// A read-modify-write sequence became a compound assignment.
    CompoundAssignment,
    /// A post-increment or post-decrement was recovered.
    PostIncrement,
    /// A try/finally was recovered as a using statement.
    UsingRecovered,
    /// A single-use stack slot was inlined into its use.
    Inlined,
    /// A store to a variable that is never read was removed.
    StoreRemoved,
    /// An initial value that is never observed was dropped.
    InitializerRemoved,
    /// An if statement was recovered from a conditional branch.
    ConditionDetected,
    /// A block with a single predecessor was merged into it.
    BlockMerged,
    /// A natural loop was wrapped in a loop container.
    LoopDetected,
    /// A state dispatch chain became a switch.
    SwitchDetected,

    /// A pipeline stage started.
    StageStarted,
    /// A pipeline stage completed.
    StageCompleted,
    /// A transform requested another run of its stage.
    RerunRequested,
    /// A function finished decompiling.
    FunctionCompleted,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            // Transformations
            Self::InlineAssignment => "inline assignment",
            Self::CompoundAssignment => "compound assignment",
            Self::PostIncrement => "post-increment",
            Self::UsingRecovered => "using recovered",
            Self::Inlined => "inlined",
            Self::StoreRemoved => "store removed",
            Self::InitializerRemoved => "initializer removed",
            Self::ConditionDetected => "condition detected",
            Self::BlockMerged => "block merged",
            Self::LoopDetected => "loop detected",
            Self::SwitchDetected => "switch detected",
            // Engine
            Self::StageStarted => "stage started",
            Self::StageCompleted => "stage completed",
            Self::RerunRequested => "rerun requested",
            Self::FunctionCompleted => "function completed",
            // Diagnostic
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a change to the instruction tree.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::InlineAssignment
                | Self::CompoundAssignment
                | Self::PostIncrement
                | Self::UsingRecovered
                | Self::Inlined
                | Self::StoreRemoved
                | Self::InitializerRemoved
                | Self::ConditionDetected
                | Self::BlockMerged
                | Self::LoopDetected
                | Self::SwitchDetected
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// Name of the function the event occurred in.
    pub function: Option<String>,
    /// IL offset the event refers to.
    pub offset: Option<u32>,
    /// Human-readable description.
    pub message: String,
    /// Name of the transform that recorded the event.
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: None,
            offset: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = &self.function {
            write!(f, " {}", function)?;
        }
        if let Some(offset) = self.offset {
            write!(f, "@IL_{:04x}", offset)?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<String>,
    offset: Option<u32>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            offset: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function and IL offset where the event occurred.
    pub fn at(mut self, function: &str, offset: u32) -> Self {
        self.function = Some(function.to_string());
        self.offset = Some(offset);
        self
    }

    /// Sets only the function, for events without a specific offset.
    pub fn function(mut self, function: &str) -> Self {
        self.function = Some(function.to_string());
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a transform.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        let event = Event {
            kind: self.kind,
            function: self.function.take(),
            offset: self.offset.take(),
            message,
            pass: self.pass.take(),
        };

        self.log.events.push(event);
    }
}

/// Collection of events from one or more decompilations.
///
/// Events can be appended concurrently through shared references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of distinct functions with transformation events.
    #[must_use]
    pub fn functions_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.function.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of the transformations.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let counts = self.count_by_kind();
        let mut parts: Vec<String> = counts
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

/// Iterator over the events of an [`EventLog`].
pub struct EventLogIter<'a> {
    inner: boxcar::Iter<'a, Event>,
}

impl<'a> Iterator for EventLogIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, e)| e)
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = EventLogIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        EventLogIter {
            inner: self.events.iter(),
        }
    }
}

impl Extend<Event> for EventLog {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        for event in iter {
            self.events.push(event);
        }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default)]
pub struct DerivedStats {
    /// Functions with at least one transformation.
    pub functions_transformed: usize,
    /// Functions that finished decompiling.
    pub functions_completed: usize,
    /// Inline assignments folded.
    pub inline_assignments: usize,
    /// Compound assignments synthesized.
    pub compound_assignments: usize,
    /// Post-increments recovered.
    pub post_increments: usize,
    /// Using statements recovered.
    pub usings: usize,
    /// Stack slots inlined.
    pub inlined: usize,
    /// Dead stores removed.
    pub stores_removed: usize,
    /// Dead initializers removed.
    pub initializers_removed: usize,
    /// If statements recovered.
    pub conditions: usize,
    /// Loops recovered.
    pub loops: usize,
    /// Switch statements recovered from dispatch chains.
    pub switches: usize,
    /// Explicit re-run requests.
    pub reruns: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            functions_transformed: log.functions_affected(),
            functions_completed: get(EventKind::FunctionCompleted),
            inline_assignments: get(EventKind::InlineAssignment),
            compound_assignments: get(EventKind::CompoundAssignment),
            post_increments: get(EventKind::PostIncrement),
            usings: get(EventKind::UsingRecovered),
            inlined: get(EventKind::Inlined),
            stores_removed: get(EventKind::StoreRemoved),
            initializers_removed: get(EventKind::InitializerRemoved),
            conditions: get(EventKind::ConditionDetected),
            loops: get(EventKind::LoopDetected),
            switches: get(EventKind::SwitchDetected),
            reruns: get(EventKind::RerunRequested),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.functions_completed > 0 {
            parts.push(format!("{} functions", self.functions_completed));
        }

        // Folding
        if self.inline_assignments > 0 {
            parts.push(format!("{} inline assignments", self.inline_assignments));
        }
        if self.compound_assignments > 0 {
            parts.push(format!("{} compound assignments", self.compound_assignments));
        }
        if self.post_increments > 0 {
            parts.push(format!("{} post-increments", self.post_increments));
        }
        if self.usings > 0 {
            parts.push(format!("{} usings", self.usings));
        }

        // Control flow
        if self.loops > 0 {
            parts.push(format!("{} loops", self.loops));
        }
        if self.switches > 0 {
            parts.push(format!("{} switches", self.switches));
        }

        // Cleanup
        if self.stores_removed > 0 {
            parts.push(format!("{} dead stores", self.stores_removed));
        }
        if self.initializers_removed > 0 {
            parts.push(format!("{} dead initializers", self.initializers_removed));
        }

        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!("{} in {:?}", stats, self.total_time)
        } else {
            stats
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
