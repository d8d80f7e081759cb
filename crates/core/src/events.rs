use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host lifecycle events the bridge reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterEvent {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Error,
    PrinterStateChanged,
    FileSelected,
    FileDeselected,
    PrintStarted,
    PrintFailed,
    PrintDone,
    PrintCancelled,
    PrintPaused,
    PrintResumed,
    ZChange,
    /// Print completion moved to a new whole percentage.
    PrintProgress,
}

impl PrinterEvent {
    pub const ALL: [PrinterEvent; 16] = [
        PrinterEvent::Connecting,
        PrinterEvent::Connected,
        PrinterEvent::Disconnecting,
        PrinterEvent::Disconnected,
        PrinterEvent::Error,
        PrinterEvent::PrinterStateChanged,
        PrinterEvent::FileSelected,
        PrinterEvent::FileDeselected,
        PrinterEvent::PrintStarted,
        PrinterEvent::PrintFailed,
        PrinterEvent::PrintDone,
        PrinterEvent::PrintCancelled,
        PrinterEvent::PrintPaused,
        PrinterEvent::PrintResumed,
        PrinterEvent::ZChange,
        PrinterEvent::PrintProgress,
    ];

    /// Name the host uses on its event bus.
    pub fn host_name(self) -> &'static str {
        match self {
            PrinterEvent::Connecting => "Connecting",
            PrinterEvent::Connected => "Connected",
            PrinterEvent::Disconnecting => "Disconnecting",
            PrinterEvent::Disconnected => "Disconnected",
            PrinterEvent::Error => "Error",
            PrinterEvent::PrinterStateChanged => "PrinterStateChanged",
            PrinterEvent::FileSelected => "FileSelected",
            PrinterEvent::FileDeselected => "FileDeselected",
            PrinterEvent::PrintStarted => "PrintStarted",
            PrinterEvent::PrintFailed => "PrintFailed",
            PrinterEvent::PrintDone => "PrintDone",
            PrinterEvent::PrintCancelled => "PrintCancelled",
            PrinterEvent::PrintPaused => "PrintPaused",
            PrinterEvent::PrintResumed => "PrintResumed",
            PrinterEvent::ZChange => "ZChange",
            PrinterEvent::PrintProgress => "PrintProgress",
        }
    }

    pub fn ends_print(self) -> bool {
        matches!(self, PrinterEvent::PrintDone | PrinterEvent::PrintFailed | PrinterEvent::PrintCancelled)
    }
}

impl fmt::Display for PrinterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event '{0}' is not handled")]
pub struct UnhandledEvent(pub String);

impl FromStr for PrinterEvent {
    type Err = UnhandledEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrinterEvent::ALL
            .into_iter()
            .find(|e| e.host_name() == s)
            .ok_or_else(|| UnhandledEvent(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_names() {
        assert_eq!("PrintStarted".parse(), Ok(PrinterEvent::PrintStarted));
        assert_eq!("ZChange".parse(), Ok(PrinterEvent::ZChange));
        let err = "Startup".parse::<PrinterEvent>().unwrap_err();
        assert_eq!(err.to_string(), "event 'Startup' is not handled");
        for e in PrinterEvent::ALL {
            assert_eq!(e.host_name().parse(), Ok(e));
        }
    }

    #[test]
    fn print_end_classification() {
        assert!(PrinterEvent::PrintCancelled.ends_print());
        assert!(!PrinterEvent::PrintPaused.ends_print());
    }
}
