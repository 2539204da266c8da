//! Structured error carried by ERR replies.

use std::fmt::{self, Write as _};

/// Success.
pub const CODE_SUCCESS: u16 = 200;
/// Service not available.
pub const CODE_SERVICE_NOT_AVAILABLE: u16 = 421;
/// Requested action not taken (e.g., lock already in use).
pub const CODE_REQUESTED_ACTION_NOT_TAKEN: u16 = 450;
/// Requested action aborted (e.g., local error in processing).
pub const CODE_REQUESTED_ACTION_ABORTED: u16 = 451;
/// Temporary authentication failure.
pub const CODE_TEMPORARY_AUTHENTICATION_FAILURE: u16 = 454;
/// General syntax error (e.g., poorly-formed XML).
pub const CODE_GENERAL_SYNTAX_ERROR: u16 = 500;
/// Syntax error in parameters (e.g., non-valid XML).
pub const CODE_PARAMETER_ERROR: u16 = 501;
/// Parameter not implemented.
pub const CODE_PARAMETER_NOT_IMPLEMENTED: u16 = 504;
/// Authentication required.
pub const CODE_AUTHENTICATION_REQUIRED: u16 = 530;
/// Authentication mechanism insufficient.
pub const CODE_AUTHENTICATION_INSUFFICIENT: u16 = 534;
/// Authentication failure.
pub const CODE_AUTHENTICATION_FAILURE: u16 = 535;
/// Action not authorized for user.
pub const CODE_ACTION_NOT_AUTHORIZED: u16 = 537;
/// Authentication mechanism requires encryption.
pub const CODE_AUTHENTICATION_REQUIRES_ENCRYPTION: u16 = 538;
/// Requested action not taken (e.g., no requested profiles are acceptable).
pub const CODE_REQUESTED_ACTION_NOT_ACCEPTED: u16 = 550;
/// Parameter invalid.
pub const CODE_PARAMETER_INVALID: u16 = 553;
/// Transaction failed (e.g., policy violation).
pub const CODE_TRANSACTION_FAILED: u16 = 554;

/// A reply code with diagnostic text, as sent in an ERR message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeepError {
    code: u16,
    diagnostic: Option<String>,
    xml_lang: Option<String>,
}

impl BeepError {
    /// Error with a code only.
    pub fn new(code: u16) -> Self {
        Self {
            code,
            diagnostic: None,
            xml_lang: None,
        }
    }

    /// Error with a code and diagnostic text.
    pub fn with_diagnostic(code: u16, diagnostic: impl Into<String>) -> Self {
        Self {
            code,
            diagnostic: Some(diagnostic.into()),
            xml_lang: None,
        }
    }

    /// Builder-style language tag for the diagnostic.
    pub fn with_lang(mut self, xml_lang: impl Into<String>) -> Self {
        self.xml_lang = Some(xml_lang.into());
        self
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn xml_lang(&self) -> Option<&str> {
        self.xml_lang.as_deref()
    }

    /// The `<error>` element body used when the session does not supply its
    /// own serializer.
    pub fn to_error_element(&self) -> String {
        let mut out = String::with_capacity(64);
        let _ = write!(out, "<error code='{}'", self.code);
        if let Some(lang) = &self.xml_lang {
            let _ = write!(out, " xml:lang='{}'", escape(lang));
        }
        match &self.diagnostic {
            Some(diagnostic) => {
                let _ = write!(out, ">{}</error>", escape(diagnostic));
            }
            None => out.push_str(" />"),
        }
        out
    }
}

impl fmt::Display for BeepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code,
            self.diagnostic.as_deref().unwrap_or("(no diagnostic)")
        )
    }
}

impl std::error::Error for BeepError {}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
