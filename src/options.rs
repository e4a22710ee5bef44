//! Configuration options for encoding.
//!
//! - [`EncodeOptions`]: the immutable per-call configuration, built with `with_*` methods
//! - [`EncodeOption`]: a single override, for the list-taking entry points
//! - [`EncodeConfig`]: a serde mirror for loading options from configuration files
//! - [`DurationFormat`]: how durations are rendered
//!
//! Options are validated once at call start. Contradictory options are rejected with
//! [`Error::InvalidOption`](crate::Error::InvalidOption), never silently ignored.
//!
//! ## Examples
//!
//! ```rust
//! use planjson::{marshal_with, Data, DurationFormat, EncodeOption, Type};
//!
//! let out = marshal_with(
//!     &Type::duration(),
//!     &Data::Duration(1_500_000_000),
//!     &[EncodeOption::DurationFormat(DurationFormat::Milliseconds)],
//! )
//! .unwrap();
//! assert_eq!(out, b"1500");
//! ```

use crate::escape::Escape;
use crate::time::{is_valid_layout, RFC3339_NANO};
use crate::types::Context;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// How durations are rendered.
///
/// ```rust
/// use planjson::DurationFormat;
///
/// assert_eq!(DurationFormat::try_from(3).unwrap(), DurationFormat::Milliseconds);
/// assert!(DurationFormat::try_from(6).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationFormat {
    /// `"1h2m3.004s"`
    #[default]
    String,
    /// Floating minutes.
    Minutes,
    /// Floating seconds.
    Seconds,
    /// Integer milliseconds, truncated.
    Milliseconds,
    /// Integer microseconds, truncated.
    Microseconds,
    /// Integer nanoseconds.
    Nanoseconds,
}

impl TryFrom<u8> for DurationFormat {
    type Error = Error;

    fn try_from(selector: u8) -> Result<Self> {
        Ok(match selector {
            0 => DurationFormat::String,
            1 => DurationFormat::Minutes,
            2 => DurationFormat::Seconds,
            3 => DurationFormat::Milliseconds,
            4 => DurationFormat::Microseconds,
            5 => DurationFormat::Nanoseconds,
            _ => {
                return Err(Error::invalid_option(format!(
                    "duration format selector {} out of range 0..=5",
                    selector
                )))
            }
        })
    }
}

/// Immutable configuration for one encoding call.
///
/// # Examples
///
/// ```rust
/// use planjson::EncodeOptions;
///
/// let options = EncodeOptions::new()
///     .with_map_sort(false)
///     .with_html_escape(false)
///     .with_deny_fields(["password"]);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct EncodeOptions {
    pub time_layout: String,
    pub duration_format: DurationFormat,
    pub unix_time: bool,
    pub sort_map_keys: bool,
    pub byte_array_as_string: bool,
    pub raw_byte_slice: bool,
    pub nil_map_as_empty: bool,
    pub nil_slice_as_empty: bool,
    pub escape_strings: bool,
    pub escape_html: bool,
    pub coerce_utf8: bool,
    pub validate_numbers: bool,
    pub compact_raw: bool,
    pub allow_fields: Option<HashSet<String>>,
    pub deny_fields: Option<HashSet<String>>,
    /// `Some(None)` records an explicitly empty context, which is rejected.
    pub context: Option<Option<Context>>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            time_layout: RFC3339_NANO.to_string(),
            duration_format: DurationFormat::default(),
            unix_time: false,
            sort_map_keys: true,
            byte_array_as_string: false,
            raw_byte_slice: false,
            nil_map_as_empty: false,
            nil_slice_as_empty: false,
            escape_strings: true,
            escape_html: true,
            coerce_utf8: true,
            validate_numbers: true,
            compact_raw: true,
            allow_fields: None,
            deny_fields: None,
            context: None,
        }
    }
}

impl fmt::Debug for EncodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeOptions")
            .field("time_layout", &self.time_layout)
            .field("duration_format", &self.duration_format)
            .field("unix_time", &self.unix_time)
            .field("sort_map_keys", &self.sort_map_keys)
            .field("byte_array_as_string", &self.byte_array_as_string)
            .field("raw_byte_slice", &self.raw_byte_slice)
            .field("nil_map_as_empty", &self.nil_map_as_empty)
            .field("nil_slice_as_empty", &self.nil_slice_as_empty)
            .field("escape_strings", &self.escape_strings)
            .field("escape_html", &self.escape_html)
            .field("coerce_utf8", &self.coerce_utf8)
            .field("validate_numbers", &self.validate_numbers)
            .field("compact_raw", &self.compact_raw)
            .field("allow_fields", &self.allow_fields)
            .field("deny_fields", &self.deny_fields)
            .field("context", &self.context.as_ref().map(|c| c.is_some()))
            .finish()
    }
}

impl EncodeOptions {
    /// Creates default options: sorted maps, full escaping, RFC 3339 times with
    /// fractional seconds, human-readable durations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a list of overrides over the defaults.
    ///
    /// The result is not validated; entry points validate at call start.
    #[must_use]
    pub fn from_list(list: &[EncodeOption]) -> Self {
        let mut options = Self::default();
        for option in list {
            option.apply(&mut options);
        }
        options
    }

    /// Checks the options for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for an empty or malformed time layout, unix
    /// timestamps combined with a custom layout, or an explicitly empty context.
    pub fn validate(&self) -> Result<()> {
        if self.time_layout.is_empty() {
            return Err(Error::invalid_option("time layout must not be empty"));
        }
        if !is_valid_layout(&self.time_layout) {
            return Err(Error::invalid_option(format!(
                "time layout {:?} contains an invalid specifier",
                self.time_layout
            )));
        }
        if self.unix_time && self.time_layout != RFC3339_NANO {
            return Err(Error::invalid_option(
                "unix timestamps and a custom time layout are mutually exclusive",
            ));
        }
        if matches!(self.context, Some(None)) {
            return Err(Error::invalid_option("context must not be empty"));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_time_layout(mut self, layout: impl Into<String>) -> Self {
        self.time_layout = layout.into();
        self
    }

    #[must_use]
    pub fn with_duration_format(mut self, format: DurationFormat) -> Self {
        self.duration_format = format;
        self
    }

    /// Renders time instants as integer Unix timestamps.
    #[must_use]
    pub fn with_unix_time(mut self, enabled: bool) -> Self {
        self.unix_time = enabled;
        self
    }

    /// Sorts map entries by rendered key. On by default.
    #[must_use]
    pub fn with_map_sort(mut self, enabled: bool) -> Self {
        self.sort_map_keys = enabled;
        self
    }

    #[must_use]
    pub fn with_byte_array_as_string(mut self, enabled: bool) -> Self {
        self.byte_array_as_string = enabled;
        self
    }

    /// Renders byte slices as escaped strings instead of base64.
    #[must_use]
    pub fn with_raw_byte_slice(mut self, enabled: bool) -> Self {
        self.raw_byte_slice = enabled;
        self
    }

    #[must_use]
    pub fn with_nil_map_as_empty(mut self, enabled: bool) -> Self {
        self.nil_map_as_empty = enabled;
        self
    }

    #[must_use]
    pub fn with_nil_slice_as_empty(mut self, enabled: bool) -> Self {
        self.nil_slice_as_empty = enabled;
        self
    }

    /// Turns string escaping off entirely. Output may no longer be valid JSON.
    #[must_use]
    pub fn with_string_escape(mut self, enabled: bool) -> Self {
        self.escape_strings = enabled;
        self
    }

    #[must_use]
    pub fn with_html_escape(mut self, enabled: bool) -> Self {
        self.escape_html = enabled;
        self
    }

    #[must_use]
    pub fn with_utf8_coercion(mut self, enabled: bool) -> Self {
        self.coerce_utf8 = enabled;
        self
    }

    #[must_use]
    pub fn with_number_validation(mut self, enabled: bool) -> Self {
        self.validate_numbers = enabled;
        self
    }

    /// Compacts and validates embedded raw payloads. On by default.
    #[must_use]
    pub fn with_raw_compaction(mut self, enabled: bool) -> Self {
        self.compact_raw = enabled;
        self
    }

    /// Restricts struct fields to those whose key is in `fields`.
    #[must_use]
    pub fn with_allow_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Drops struct fields whose key is in `fields`. Wins over the allow list.
    #[must_use]
    pub fn with_deny_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deny_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Context handed to append-with-context hooks.
    #[must_use]
    pub fn with_context(mut self, context: Option<Context>) -> Self {
        self.context = Some(context);
        self
    }

    #[inline]
    pub(crate) fn escape(&self) -> Escape {
        Escape {
            html: self.escape_html,
            coerce_utf8: self.coerce_utf8,
            disabled: !self.escape_strings,
        }
    }

    #[inline]
    pub(crate) fn context(&self) -> Option<&Context> {
        self.context.as_ref().and_then(Option::as_ref)
    }

    /// Whether a struct field with key `name` passes the allow and deny lists.
    #[inline]
    pub(crate) fn field_allowed(&self, name: &str) -> bool {
        if let Some(deny) = &self.deny_fields {
            if deny.contains(name) {
                return false;
            }
        }
        match &self.allow_fields {
            Some(allow) => allow.contains(name),
            None => true,
        }
    }

    #[inline]
    pub(crate) fn filters_fields(&self) -> bool {
        self.allow_fields.is_some() || self.deny_fields.is_some()
    }
}

/// A single override applied on top of the default options.
#[derive(Clone)]
pub enum EncodeOption {
    TimeLayout(String),
    DurationFormat(DurationFormat),
    UnixTime,
    DisableMapSort,
    ByteArrayAsString,
    RawByteSlice,
    NilMapAsEmpty,
    NilSliceAsEmpty,
    DisableStringEscape,
    DisableHtmlEscape,
    DisableUtf8Coercion,
    DisableNumberValidation,
    DisableRawCompaction,
    AllowFields(Vec<String>),
    DenyFields(Vec<String>),
    Context(Option<Context>),
}

impl EncodeOption {
    fn apply(&self, options: &mut EncodeOptions) {
        match self {
            EncodeOption::TimeLayout(layout) => options.time_layout = layout.clone(),
            EncodeOption::DurationFormat(format) => options.duration_format = *format,
            EncodeOption::UnixTime => options.unix_time = true,
            EncodeOption::DisableMapSort => options.sort_map_keys = false,
            EncodeOption::ByteArrayAsString => options.byte_array_as_string = true,
            EncodeOption::RawByteSlice => options.raw_byte_slice = true,
            EncodeOption::NilMapAsEmpty => options.nil_map_as_empty = true,
            EncodeOption::NilSliceAsEmpty => options.nil_slice_as_empty = true,
            EncodeOption::DisableStringEscape => options.escape_strings = false,
            EncodeOption::DisableHtmlEscape => options.escape_html = false,
            EncodeOption::DisableUtf8Coercion => options.coerce_utf8 = false,
            EncodeOption::DisableNumberValidation => options.validate_numbers = false,
            EncodeOption::DisableRawCompaction => options.compact_raw = false,
            EncodeOption::AllowFields(fields) => {
                options.allow_fields = Some(fields.iter().cloned().collect())
            }
            EncodeOption::DenyFields(fields) => {
                options.deny_fields = Some(fields.iter().cloned().collect())
            }
            EncodeOption::Context(context) => options.context = Some(context.clone()),
        }
    }
}

impl fmt::Debug for EncodeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeOption::Context(c) => write!(f, "Context({})", if c.is_some() { "..." } else { "None" }),
            EncodeOption::TimeLayout(l) => write!(f, "TimeLayout({:?})", l),
            EncodeOption::DurationFormat(d) => write!(f, "DurationFormat({:?})", d),
            EncodeOption::AllowFields(v) => write!(f, "AllowFields({:?})", v),
            EncodeOption::DenyFields(v) => write!(f, "DenyFields({:?})", v),
            EncodeOption::UnixTime => f.write_str("UnixTime"),
            EncodeOption::DisableMapSort => f.write_str("DisableMapSort"),
            EncodeOption::ByteArrayAsString => f.write_str("ByteArrayAsString"),
            EncodeOption::RawByteSlice => f.write_str("RawByteSlice"),
            EncodeOption::NilMapAsEmpty => f.write_str("NilMapAsEmpty"),
            EncodeOption::NilSliceAsEmpty => f.write_str("NilSliceAsEmpty"),
            EncodeOption::DisableStringEscape => f.write_str("DisableStringEscape"),
            EncodeOption::DisableHtmlEscape => f.write_str("DisableHtmlEscape"),
            EncodeOption::DisableUtf8Coercion => f.write_str("DisableUtf8Coercion"),
            EncodeOption::DisableNumberValidation => f.write_str("DisableNumberValidation"),
            EncodeOption::DisableRawCompaction => f.write_str("DisableRawCompaction"),
        }
    }
}

/// Serde-loadable mirror of [`EncodeOptions`].
///
/// Every field is optional; missing fields keep their defaults. The duration format
/// is a numeric selector so out-of-range values can be rejected.
///
/// ```rust
/// use planjson::{EncodeConfig, EncodeOptions};
///
/// let config: EncodeConfig = serde_json::from_str(
///     r#"{"duration_format": 2, "sort_map_keys": false}"#,
/// ).unwrap();
/// let options = EncodeOptions::try_from(config).unwrap();
/// assert!(!options.sort_map_keys);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeConfig {
    pub time_layout: Option<String>,
    pub duration_format: Option<u8>,
    pub unix_time: Option<bool>,
    pub sort_map_keys: Option<bool>,
    pub byte_array_as_string: Option<bool>,
    pub raw_byte_slice: Option<bool>,
    pub nil_map_as_empty: Option<bool>,
    pub nil_slice_as_empty: Option<bool>,
    pub escape_strings: Option<bool>,
    pub escape_html: Option<bool>,
    pub coerce_utf8: Option<bool>,
    pub validate_numbers: Option<bool>,
    pub compact_raw: Option<bool>,
    pub allow_fields: Option<Vec<String>>,
    pub deny_fields: Option<Vec<String>>,
}

impl TryFrom<EncodeConfig> for EncodeOptions {
    type Error = Error;

    fn try_from(config: EncodeConfig) -> Result<Self> {
        let defaults = EncodeOptions::default();
        let options = EncodeOptions {
            time_layout: config.time_layout.unwrap_or(defaults.time_layout),
            duration_format: match config.duration_format {
                Some(selector) => DurationFormat::try_from(selector)?,
                None => defaults.duration_format,
            },
            unix_time: config.unix_time.unwrap_or(defaults.unix_time),
            sort_map_keys: config.sort_map_keys.unwrap_or(defaults.sort_map_keys),
            byte_array_as_string: config
                .byte_array_as_string
                .unwrap_or(defaults.byte_array_as_string),
            raw_byte_slice: config.raw_byte_slice.unwrap_or(defaults.raw_byte_slice),
            nil_map_as_empty: config.nil_map_as_empty.unwrap_or(defaults.nil_map_as_empty),
            nil_slice_as_empty: config
                .nil_slice_as_empty
                .unwrap_or(defaults.nil_slice_as_empty),
            escape_strings: config.escape_strings.unwrap_or(defaults.escape_strings),
            escape_html: config.escape_html.unwrap_or(defaults.escape_html),
            coerce_utf8: config.coerce_utf8.unwrap_or(defaults.coerce_utf8),
            validate_numbers: config.validate_numbers.unwrap_or(defaults.validate_numbers),
            compact_raw: config.compact_raw.unwrap_or(defaults.compact_raw),
            allow_fields: config.allow_fields.map(|v| v.into_iter().collect()),
            deny_fields: config.deny_fields.map(|v| v.into_iter().collect()),
            context: None,
        };
        options.validate()?;
        Ok(options)
    }
}
