//! Error types for the rrdb round-robin database.

use thiserror::Error;

/// The main error type for all rrdb operations.
///
/// This enum covers every failure an operation can report, from parsing a
/// `DS:`/`RRA:` argument to evaluating an export expression. The `Display`
/// text is what the C ABI hands back as its error string.
#[derive(Error, Debug)]
pub enum RrdError {
    /// Error in a data source or archive definition.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// Error reading, writing, or validating a database file.
    #[error("{0}")]
    File(#[from] FileError),

    /// Error during an update.
    #[error("{0}")]
    Update(#[from] UpdateError),

    /// Error during a fetch.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Error compiling or evaluating an RPN expression.
    #[error("{0}")]
    Rpn(#[from] RpnError),

    /// Error during an export.
    #[error("{0}")]
    Xport(#[from] XportError),

    /// Error parsing a time specification.
    #[error("{0}")]
    TimeSpec(#[from] TimeSpecError),
}

/// Errors in data source and archive definitions.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The argument is neither a `DS:` nor an `RRA:` definition.
    #[error("can't parse argument '{arg}'")]
    UnknownArgument {
        /// The offending argument.
        arg: String,
    },

    /// A `DS:` definition is malformed.
    #[error("invalid DS format '{arg}': {reason}")]
    InvalidDataSource {
        /// The offending argument.
        arg: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An `RRA:` definition is malformed.
    #[error("invalid RRA format '{arg}': {reason}")]
    InvalidArchive {
        /// The offending argument.
        arg: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Unrecognised data source type.
    #[error("unknown data source type '{kind}'")]
    UnknownDataSourceType {
        /// The type name as given.
        kind: String,
    },

    /// Unrecognised consolidation function.
    #[error("unknown consolidation function '{cf}'")]
    UnknownConsolidationFn {
        /// The function name as given.
        cf: String,
    },

    /// An aberrant behavior detection function, which has no archive type
    /// here.
    #[error("{cf} is not supported: aberrant behavior archives are not implemented")]
    UnsupportedConsolidationFn {
        /// The function name as given.
        cf: String,
    },

    /// Two data sources share a name.
    #[error("duplicate DS name: {name}")]
    DuplicateDataSource {
        /// The duplicated name.
        name: String,
    },

    /// A COMPUTE expression references a data source that is not defined
    /// before it.
    #[error("COMPUTE DS '{name}' references unknown data source '{reference}'")]
    UnknownComputeReference {
        /// The COMPUTE data source.
        name: String,
        /// The name it references.
        reference: String,
    },

    /// No data source was defined.
    #[error("you must define at least one Data Source")]
    NoDataSources,

    /// No archive was defined.
    #[error("you must define at least one Round Robin Archive")]
    NoArchives,

    /// The step is zero.
    #[error("step size must be greater than zero")]
    InvalidStep,
}

/// Errors reading, writing, or validating a database file.
#[derive(Error, Debug)]
pub enum FileError {
    /// The file could not be opened or created.
    #[error("opening '{path}': {source}")]
    Open {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file already exists and overwriting was not requested.
    #[error("creating '{path}': file exists")]
    Exists {
        /// The file path.
        path: String,
    },

    /// The file could not be locked.
    #[error("locking '{path}': {source}")]
    Lock {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping failed.
    #[error("memory mapping '{path}': {source}")]
    MemoryMap {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Flushing the mapping to disk failed.
    #[error("syncing '{path}' to disk: {source}")]
    Sync {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid rrdb database.
    #[error("'{path}' is not a valid RRD file: {reason}")]
    Corrupted {
        /// The file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The embedded definition block could not be (de)serialized.
    #[error("definition block of '{path}': {source}")]
    Definition {
        /// The file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A write was attempted through a read-only mapping.
    #[error("'{path}' is opened read-only")]
    ReadOnly {
        /// The file path.
        path: String,
    },
}

/// Errors during an update.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The update timestamp is not after the last update.
    #[error(
        "illegal attempt to update using time {timestamp} when last update time is {last_update} (minimum one second step)"
    )]
    IllegalTime {
        /// The rejected timestamp.
        timestamp: u64,
        /// The stored last update time.
        last_update: u64,
    },

    /// An update argument could not be parsed.
    #[error("invalid update argument '{arg}': {reason}")]
    InvalidArgument {
        /// The offending argument.
        arg: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The number of values does not match the template.
    #[error("expected {expected} data source readings (got {found}) from {arg}")]
    ValueCount {
        /// The offending argument.
        arg: String,
        /// Values the template expects.
        expected: usize,
        /// Values actually supplied.
        found: usize,
    },

    /// A template names a data source that does not exist.
    #[error("unknown DS name '{name}' in template")]
    UnknownTemplateName {
        /// The unknown name.
        name: String,
    },

    /// A template names a COMPUTE data source, which takes no readings.
    #[error("COMPUTE DS '{name}' can not be updated")]
    ComputeInTemplate {
        /// The COMPUTE data source.
        name: String,
    },

    /// A template names the same data source twice.
    #[error("DS '{name}' appears more than once in template")]
    DuplicateTemplateName {
        /// The duplicated name.
        name: String,
    },

    /// `update` was called without any arguments.
    #[error("not enough arguments")]
    NoArguments,
}

/// Errors during a fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The time range is empty or inverted.
    #[error("start ({start}) should be less than end ({end})")]
    InvalidTimeRange {
        /// The start time.
        start: u64,
        /// The end time.
        end: u64,
    },

    /// No archive uses the requested consolidation function.
    #[error("the RRD does not contain an RRA matching the chosen CF ({cf})")]
    NoMatchingArchive {
        /// The requested consolidation function.
        cf: String,
    },

    /// The requested data source does not exist.
    #[error("no DS called '{name}' in '{path}'")]
    UnknownDataSource {
        /// The database path.
        path: String,
        /// The requested data source.
        name: String,
    },

    /// The aligned range holds more rows than a fetch can return.
    #[error("range {start}..{end} at {step}s steps holds too many rows to fetch")]
    TooManyRows {
        /// The requested start time.
        start: u64,
        /// The requested end time.
        end: u64,
        /// The row step of the selected archive.
        step: u64,
    },

    /// The requested archive index is out of range.
    #[error("invalid RRA index {index}: only {count} archives available")]
    InvalidArchive {
        /// The requested index.
        index: usize,
        /// Number of archives in the file.
        count: usize,
    },
}

/// Errors compiling or evaluating an RPN expression.
#[derive(Error, Debug)]
pub enum RpnError {
    /// The expression is empty.
    #[error("empty RPN expression")]
    Empty,

    /// A token is neither a number, an operator, nor a valid name.
    #[error("don't understand '{token}' in RPN expression")]
    UnknownToken {
        /// The offending token.
        token: String,
    },

    /// An operator found fewer operands than it needs.
    #[error("RPN stack underflow at '{op}'")]
    StackUnderflow {
        /// The operator that underflowed.
        op: String,
    },

    /// The expression left more or fewer than one value on the stack.
    #[error("RPN final stack size != 1 (found {size})")]
    FinalStackSize {
        /// Remaining stack depth.
        size: usize,
    },

    /// A variable is not bound.
    #[error("unknown variable '{name}' in RPN expression")]
    UnknownVariable {
        /// The unbound name.
        name: String,
    },

    /// The `AVG` count is not a valid non-negative integer.
    #[error("invalid element count {count} for {op}")]
    InvalidCount {
        /// The operator.
        op: String,
        /// The count popped from the stack.
        count: f64,
    },
}

/// Errors during an export.
#[derive(Error, Debug)]
pub enum XportError {
    /// An option is unknown or lacks its value.
    #[error("invalid option '{option}': {reason}")]
    InvalidOption {
        /// The offending option.
        option: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A statement is neither DEF, CDEF, nor XPORT, or is malformed.
    #[error("can't parse '{statement}': {reason}")]
    InvalidStatement {
        /// The offending statement.
        statement: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A variable name is used twice.
    #[error("duplicate variable name '{name}'")]
    DuplicateVariable {
        /// The duplicated name.
        name: String,
    },

    /// A statement references an undefined variable.
    #[error("unknown variable '{name}'")]
    UnknownVariable {
        /// The undefined name.
        name: String,
    },

    /// No XPORT statement was given.
    #[error("no XPORT found, nothing to do")]
    NothingToExport,

    /// The time range is empty or inverted.
    #[error("start ({start}) should be less than end ({end})")]
    InvalidTimeRange {
        /// The start time.
        start: u64,
        /// The end time.
        end: u64,
    },
}

/// Errors parsing a time specification.
#[derive(Error, Debug)]
pub enum TimeSpecError {
    /// The specification could not be parsed.
    #[error("invalid time specification '{spec}': {reason}")]
    Invalid {
        /// The offending specification.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;
