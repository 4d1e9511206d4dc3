//! Error taxonomy: category × severity, plus the fixed codes and recovery
//! suggestions derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ModuleLoad,
    RequestHandling,
    TaskExecution,
    Validation,
    HostApi,
    Configuration,
    System,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::ModuleLoad,
        ErrorCategory::RequestHandling,
        ErrorCategory::TaskExecution,
        ErrorCategory::Validation,
        ErrorCategory::HostApi,
        ErrorCategory::Configuration,
        ErrorCategory::System,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::ModuleLoad => "MODULE_LOAD",
            ErrorCategory::RequestHandling => "REQUEST_HANDLING",
            ErrorCategory::TaskExecution => "TASK_EXECUTION",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::HostApi => "HOST_API",
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::System => "SYSTEM",
        }
    }

    /// Stable client-facing code.
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::ModuleLoad => "MODULE_LOAD_ERROR",
            ErrorCategory::RequestHandling => "REQUEST_HANDLING_ERROR",
            ErrorCategory::TaskExecution => "TASK_EXECUTION_ERROR",
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::HostApi => "HOST_API_ERROR",
            ErrorCategory::Configuration => "CONFIGURATION_ERROR",
            ErrorCategory::System => "SYSTEM_ERROR",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCategory::Validation => 400,
            _ => 500,
        }
    }

    pub fn recovery_suggestions(self) -> &'static [&'static str] {
        match self {
            ErrorCategory::ModuleLoad => &[
                "Restart the add-in to reload its modules",
                "Check the server log for the module that failed to load",
            ],
            ErrorCategory::RequestHandling => &[
                "Check the request path, method and body",
                "Retry the request once the current operation has finished",
            ],
            ErrorCategory::TaskExecution => &[
                "Check that the operation's arguments are valid for the active document",
                "Retry the operation; queued work is never retried automatically",
            ],
            ErrorCategory::Validation => &[
                "Fix the parameter named in the error details and resend the request",
                "Omit optional parameters to use their defaults",
            ],
            ErrorCategory::HostApi => &[
                "Make sure a design document is open and active in the host application",
                "Close any modal dialog that may be blocking the host application",
            ],
            ErrorCategory::Configuration => &[
                "Check the route and validation registrations made at startup",
                "Check the bridge configuration file",
            ],
            ErrorCategory::System => &[
                "Check the server log for details",
                "Restart the bridge if the problem persists",
            ],
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra suggestions keyed on substrings of the failing module's name.
const MODULE_HINTS: &[(&[&str], &str)] = &[
    (
        &["cam", "toolpath", "setup"],
        "Make sure the document has a CAM setup and the Manufacture workspace is available",
    ),
    (
        &["tool"],
        "Confirm the tool id exists in the tool library",
    ),
    (
        &["sketch", "geometry", "draw", "extrude"],
        "Check that dimensions are positive and expressed in document units",
    ),
    (
        &["export", "file"],
        "Check that the export path exists and is writable",
    ),
    (
        &["router", "server", "http"],
        "Call GET /routes to list the available endpoints",
    ),
];

/// Category suggestions followed by module-specific ones. Depends only on
/// the taxonomy and the module name, never on the error instance.
pub fn recovery_suggestions(category: ErrorCategory, module: &str) -> Vec<String> {
    let module = module.to_ascii_lowercase();
    let mut out: Vec<String> = category
        .recovery_suggestions()
        .iter()
        .map(|s| s.to_string())
        .collect();

    for (needles, hint) in MODULE_HINTS {
        if needles.iter().any(|n| module.contains(n)) {
            out.push((*hint).to_string());
        }
    }
    out
}
