//! Database and transaction options.
//!
//! Options cross the engine boundary as `(code, Option<bytes>)`. Integer
//! parameters are 8-byte little-endian; string parameters are UTF-8. The typed
//! enums below parse and validate that raw form.

use crate::error::{FluxError, FluxResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseOption {
    LocationCacheSize(i64),
    MaxWatches(i64),
    MachineId(String),
    DatacenterId(String),
    /// Default transaction timeout in milliseconds; 0 disables it
    TransactionTimeout(i64),
    /// Default retry limit; -1 means unlimited
    TransactionRetryLimit(i64),
    /// Default cap on the `on_error` backoff in milliseconds
    TransactionMaxRetryDelay(i64),
    /// Default transaction size limit in bytes
    TransactionSizeLimit(i64),
}

impl DatabaseOption {
    pub fn code(&self) -> i32 {
        match self {
            DatabaseOption::LocationCacheSize(_) => 10,
            DatabaseOption::MaxWatches(_) => 20,
            DatabaseOption::MachineId(_) => 21,
            DatabaseOption::DatacenterId(_) => 22,
            DatabaseOption::TransactionTimeout(_) => 500,
            DatabaseOption::TransactionRetryLimit(_) => 501,
            DatabaseOption::TransactionMaxRetryDelay(_) => 502,
            DatabaseOption::TransactionSizeLimit(_) => 503,
        }
    }

    /// Raw parameter as sent across the engine boundary.
    pub fn value_bytes(&self) -> Option<Vec<u8>> {
        match self {
            DatabaseOption::LocationCacheSize(v)
            | DatabaseOption::MaxWatches(v)
            | DatabaseOption::TransactionTimeout(v)
            | DatabaseOption::TransactionRetryLimit(v)
            | DatabaseOption::TransactionMaxRetryDelay(v)
            | DatabaseOption::TransactionSizeLimit(v) => Some(v.to_le_bytes().to_vec()),
            DatabaseOption::MachineId(s) | DatabaseOption::DatacenterId(s) => {
                Some(s.as_bytes().to_vec())
            }
        }
    }

    /// Parse and validate a raw option.
    pub fn from_raw(code: i32, value: Option<&[u8]>) -> FluxResult<Self> {
        let option = match code {
            10 => DatabaseOption::LocationCacheSize(int_value(code, value)?),
            20 => DatabaseOption::MaxWatches(int_value(code, value)?),
            21 => DatabaseOption::MachineId(string_value(code, value)?),
            22 => DatabaseOption::DatacenterId(string_value(code, value)?),
            500 => DatabaseOption::TransactionTimeout(int_value(code, value)?),
            501 => DatabaseOption::TransactionRetryLimit(int_value(code, value)?),
            502 => DatabaseOption::TransactionMaxRetryDelay(int_value(code, value)?),
            503 => DatabaseOption::TransactionSizeLimit(int_value(code, value)?),
            _ => return Err(FluxError::InvalidOption { code }),
        };
        option.validate()?;
        Ok(option)
    }

    pub fn validate(&self) -> FluxResult<()> {
        let code = self.code();
        match *self {
            DatabaseOption::LocationCacheSize(v) => in_range(code, v, 0, 1_000_000),
            DatabaseOption::MaxWatches(v) => in_range(code, v, 0, 1_000_000),
            DatabaseOption::TransactionTimeout(v) => in_range(code, v, 0, i64::MAX),
            DatabaseOption::TransactionRetryLimit(v) => in_range(code, v, -1, i32::MAX as i64),
            DatabaseOption::TransactionMaxRetryDelay(v) => in_range(code, v, 0, i32::MAX as i64),
            DatabaseOption::TransactionSizeLimit(v) => in_range(code, v, 32, 10_000_000),
            DatabaseOption::MachineId(_) | DatabaseOption::DatacenterId(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionOption {
    CausalWriteRisky,
    CausalReadRisky,
    /// The next write does not add a write conflict range
    NextWriteNoWriteConflictRange,
    /// Reads stop seeing the transaction's own writes
    ReadYourWritesDisable,
    AccessSystemKeys,
    ReadSystemKeys,
    /// Timeout in milliseconds; 0 disables it
    Timeout(i64),
    /// Retry limit; -1 means unlimited
    RetryLimit(i64),
    /// Cap on the `on_error` backoff in milliseconds
    MaxRetryDelay(i64),
    /// Size limit in bytes
    SizeLimit(i64),
}

impl TransactionOption {
    pub fn code(&self) -> i32 {
        match self {
            TransactionOption::CausalWriteRisky => 10,
            TransactionOption::CausalReadRisky => 20,
            TransactionOption::NextWriteNoWriteConflictRange => 30,
            TransactionOption::ReadYourWritesDisable => 51,
            TransactionOption::AccessSystemKeys => 301,
            TransactionOption::ReadSystemKeys => 302,
            TransactionOption::Timeout(_) => 500,
            TransactionOption::RetryLimit(_) => 501,
            TransactionOption::MaxRetryDelay(_) => 502,
            TransactionOption::SizeLimit(_) => 503,
        }
    }

    pub fn value_bytes(&self) -> Option<Vec<u8>> {
        match self {
            TransactionOption::Timeout(v)
            | TransactionOption::RetryLimit(v)
            | TransactionOption::MaxRetryDelay(v)
            | TransactionOption::SizeLimit(v) => Some(v.to_le_bytes().to_vec()),
            _ => None,
        }
    }

    pub fn from_raw(code: i32, value: Option<&[u8]>) -> FluxResult<Self> {
        let option = match code {
            10 => no_value(code, value, TransactionOption::CausalWriteRisky)?,
            20 => no_value(code, value, TransactionOption::CausalReadRisky)?,
            30 => no_value(code, value, TransactionOption::NextWriteNoWriteConflictRange)?,
            51 => no_value(code, value, TransactionOption::ReadYourWritesDisable)?,
            301 => no_value(code, value, TransactionOption::AccessSystemKeys)?,
            302 => no_value(code, value, TransactionOption::ReadSystemKeys)?,
            500 => TransactionOption::Timeout(int_value(code, value)?),
            501 => TransactionOption::RetryLimit(int_value(code, value)?),
            502 => TransactionOption::MaxRetryDelay(int_value(code, value)?),
            503 => TransactionOption::SizeLimit(int_value(code, value)?),
            _ => return Err(FluxError::InvalidOption { code }),
        };
        option.validate()?;
        Ok(option)
    }

    pub fn validate(&self) -> FluxResult<()> {
        let code = self.code();
        match *self {
            TransactionOption::Timeout(v) => in_range(code, v, 0, i64::MAX),
            TransactionOption::RetryLimit(v) => in_range(code, v, -1, i32::MAX as i64),
            TransactionOption::MaxRetryDelay(v) => in_range(code, v, 0, i32::MAX as i64),
            TransactionOption::SizeLimit(v) => in_range(code, v, 32, 10_000_000),
            _ => Ok(()),
        }
    }
}

fn invalid(code: i32, reason: impl Into<String>) -> FluxError {
    FluxError::InvalidOptionValue {
        code,
        reason: reason.into(),
    }
}

fn int_value(code: i32, value: Option<&[u8]>) -> FluxResult<i64> {
    let raw = value.ok_or_else(|| invalid(code, "integer parameter required"))?;
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| invalid(code, format!("expected 8 bytes, got {}", raw.len())))?;
    Ok(i64::from_le_bytes(bytes))
}

fn string_value(code: i32, value: Option<&[u8]>) -> FluxResult<String> {
    let raw = value.ok_or_else(|| invalid(code, "string parameter required"))?;
    String::from_utf8(raw.to_vec()).map_err(|_| invalid(code, "parameter is not valid UTF-8"))
}

fn no_value(code: i32, value: Option<&[u8]>, option: TransactionOption) -> FluxResult<TransactionOption> {
    match value {
        None => Ok(option),
        Some(_) => Err(invalid(code, "option takes no parameter")),
    }
}

fn in_range(code: i32, v: i64, min: i64, max: i64) -> FluxResult<()> {
    if v < min || v > max {
        return Err(invalid(code, format!("{v} outside {min}..={max}")));
    }
    Ok(())
}
