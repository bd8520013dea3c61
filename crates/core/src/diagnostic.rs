use std::fmt;

/// Severity of a reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
}

/// Collected events of one invocation. Rendering is left to the caller; every
/// record is also forwarded to the `log` facade.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Info => "INFO",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level.label(), self.message)
    }
}

impl Diagnostics {
    pub fn push(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::Error => log::error!("{message}"),
            Level::Warning => log::warn!("{message}"),
            Level::Info => log::info!("{message}"),
        }
        self.0.push(Diagnostic { level, message });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Level::Warning, message)
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Level::Info, message)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.level == Level::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[test]
fn labelled_lines() {
    let mut diags = Diagnostics::default();
    diags.warn("check the graph");
    diags.info("Finish!");
    let lines = diags.iter().map(ToString::to_string).collect::<Vec<_>>();
    assert_eq!(lines, vec!["WARNING: check the graph", "INFO: Finish!"]);
    assert_eq!(diags.warnings().count(), 1);
}
