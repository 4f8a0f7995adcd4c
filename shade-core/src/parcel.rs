//! Parcel codec
//!
//! A little-endian, 4-byte aligned buffer modelled on Android's `Parcel`.
//! Binder-style calls use it to carry arguments, replies and exceptions;
//! an exception written on one side is read back with the same class and
//! message on the other.

use shade_error::ParcelError;

use crate::throwable::{InvokeError, Throwable, classes};
use crate::value::Value;

/// No exception
pub const EX_NONE: i32 = 0;
pub const EX_SECURITY: i32 = -1;
pub const EX_BAD_PARCELABLE: i32 = -2;
pub const EX_ILLEGAL_ARGUMENT: i32 = -3;
pub const EX_NULL_POINTER: i32 = -4;
pub const EX_ILLEGAL_STATE: i32 = -5;
pub const EX_NETWORK_MAIN_THREAD: i32 = -6;
pub const EX_UNSUPPORTED_OPERATION: i32 = -7;
pub const EX_SERVICE_SPECIFIC: i32 = -8;
/// Marks a reply header that precedes the real exception code
pub const EX_HAS_REPLY_HEADER: i32 = -128;

const VAL_NULL: i32 = -1;
const VAL_STRING: i32 = 0;
const VAL_INTEGER: i32 = 1;
const VAL_LONG: i32 = 6;
const VAL_FLOAT: i32 = 7;
const VAL_DOUBLE: i32 = 8;
const VAL_BOOLEAN: i32 = 9;
const VAL_OBJECTARRAY: i32 = 17;

const EXCEPTION_CODES: [(&str, i32); 8] = [
    (classes::SECURITY, EX_SECURITY),
    (classes::BAD_PARCELABLE, EX_BAD_PARCELABLE),
    (classes::ILLEGAL_ARGUMENT, EX_ILLEGAL_ARGUMENT),
    (classes::NULL_POINTER, EX_NULL_POINTER),
    (classes::ILLEGAL_STATE, EX_ILLEGAL_STATE),
    (classes::NETWORK_ON_MAIN_THREAD, EX_NETWORK_MAIN_THREAD),
    (classes::UNSUPPORTED_OPERATION, EX_UNSUPPORTED_OPERATION),
    (classes::SERVICE_SPECIFIC, EX_SERVICE_SPECIFIC),
];

/// Wire code for an exception class
pub fn exception_code(class_name: &str) -> Option<i32> {
    EXCEPTION_CODES
        .iter()
        .find(|(name, _)| *name == class_name)
        .map(|(_, code)| *code)
}

/// Exception class for a wire code
pub fn exception_class(code: i32) -> Option<&'static str> {
    EXCEPTION_CODES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parcel {
    data: Vec<u8>,
    position: usize,
}

impl Parcel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A parcel positioned at the start of `bytes`
    pub fn unmarshall(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            position: 0,
        }
    }

    pub fn marshall(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn data_position(&self) -> usize {
        self.position
    }

    /// Move the cursor; positions past the end are clamped
    pub fn set_data_position(&mut self, position: usize) {
        self.position = position.min(self.data.len());
    }

    pub fn data_avail(&self) -> usize {
        self.data.len() - self.position
    }

    /// Discard all content
    pub fn recycle(&mut self) {
        self.data.clear();
        self.position = 0;
    }

    pub fn write_int(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_long(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_float(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_int(i32::from(value));
    }

    /// Length-prefixed UTF-8 with a terminating NUL; `None` is length -1
    pub fn write_string(&mut self, value: Option<&str>) {
        match value {
            None => self.write_int(-1),
            Some(s) => {
                self.write_int(s.len() as i32);
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                self.write_padded(&bytes);
            }
        }
    }

    pub fn write_byte_array(&mut self, value: Option<&[u8]>) {
        match value {
            None => self.write_int(-1),
            Some(bytes) => {
                self.write_int(bytes.len() as i32);
                self.write_padded(bytes);
            }
        }
    }

    /// Tagged value; objects cannot be written
    pub fn write_value(&mut self, value: &Value) -> Result<(), ParcelError> {
        match value {
            Value::Null => self.write_int(VAL_NULL),
            Value::Str(s) => {
                self.write_int(VAL_STRING);
                self.write_string(Some(s));
            }
            Value::Int(i) => {
                self.write_int(VAL_INTEGER);
                self.write_int(*i);
            }
            Value::Long(l) => {
                self.write_int(VAL_LONG);
                self.write_long(*l);
            }
            Value::Float(f) => {
                self.write_int(VAL_FLOAT);
                self.write_float(*f);
            }
            Value::Double(d) => {
                self.write_int(VAL_DOUBLE);
                self.write_double(*d);
            }
            Value::Bool(b) => {
                self.write_int(VAL_BOOLEAN);
                self.write_bool(*b);
            }
            Value::Array(items) => {
                self.write_int(VAL_OBJECTARRAY);
                self.write_int(items.len() as i32);
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Object(obj) => return Err(ParcelError::Unparcelable(obj.class_name().to_string())),
            Value::Void => return Err(ParcelError::Unparcelable("void".to_string())),
        }
        Ok(())
    }

    pub fn read_int(&mut self) -> Result<i32, ParcelError> {
        let bytes = self.read_array::<4>()?;
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn read_long(&mut self) -> Result<i64, ParcelError> {
        let bytes = self.read_array::<8>()?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_float(&mut self) -> Result<f32, ParcelError> {
        let bytes = self.read_array::<4>()?;
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn read_double(&mut self) -> Result<f64, ParcelError> {
        let bytes = self.read_array::<8>()?;
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn read_bool(&mut self) -> Result<bool, ParcelError> {
        Ok(self.read_int()? != 0)
    }

    pub fn read_string(&mut self) -> Result<Option<String>, ParcelError> {
        let len = self.read_int()?;
        if len == -1 {
            return Ok(None);
        }
        let len = checked_len(len)?;
        let start = self.position;
        let bytes = self.read_padded(len + 1)?;
        let text = std::str::from_utf8(&bytes[..len]).map_err(|_| ParcelError::InvalidUtf8(start))?;
        Ok(Some(text.to_string()))
    }

    pub fn read_byte_array(&mut self) -> Result<Option<Vec<u8>>, ParcelError> {
        let len = self.read_int()?;
        if len == -1 {
            return Ok(None);
        }
        let len = checked_len(len)?;
        Ok(Some(self.read_padded(len)?))
    }

    pub fn read_value(&mut self) -> Result<Value, ParcelError> {
        let tag = self.read_int()?;
        Ok(match tag {
            VAL_NULL => Value::Null,
            VAL_STRING => self.read_string()?.map_or(Value::Null, Value::Str),
            VAL_INTEGER => Value::Int(self.read_int()?),
            VAL_LONG => Value::Long(self.read_long()?),
            VAL_FLOAT => Value::Float(self.read_float()?),
            VAL_DOUBLE => Value::Double(self.read_double()?),
            VAL_BOOLEAN => Value::Bool(self.read_bool()?),
            VAL_OBJECTARRAY => {
                let len = checked_len(self.read_int()?)?;
                let mut items = Vec::with_capacity(len.min(self.data_avail()));
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Value::Array(items)
            }
            other => return Err(ParcelError::UnknownTag(other)),
        })
    }

    /// Write `exception` as a binder reply
    ///
    /// Only exception classes with a wire code can cross the boundary;
    /// anything else is [`ParcelError::Unparcelable`].
    pub fn write_exception(&mut self, exception: &Throwable) -> Result<(), ParcelError> {
        let code = exception_code(&exception.class_name)
            .ok_or_else(|| ParcelError::Unparcelable(exception.class_name.clone()))?;
        self.write_int(code);
        self.write_string(exception.message());
        if code == EX_SERVICE_SPECIFIC {
            self.write_int(0);
        }
        Ok(())
    }

    pub fn write_no_exception(&mut self) {
        self.write_int(EX_NONE);
    }

    /// Read the exception header of a reply, if there is one
    ///
    /// Unknown codes come back as a `RuntimeException` naming the code and
    /// message.
    pub fn read_exception(&mut self) -> Result<Option<Throwable>, ParcelError> {
        let mut code = self.read_int()?;
        if code == EX_HAS_REPLY_HEADER {
            let header_size = checked_len(self.read_int()?)?;
            let skip_to = self.position + header_size;
            if skip_to > self.data.len() {
                return Err(ParcelError::Underflow(header_size, self.position));
            }
            self.position = skip_to;
            code = EX_NONE;
        }
        if code == EX_NONE {
            return Ok(None);
        }

        let message = self.read_string()?;
        let exception = match exception_class(code) {
            Some(class_name) => {
                if code == EX_SERVICE_SPECIFIC {
                    self.read_int()?;
                }
                Throwable {
                    class_name: class_name.to_string(),
                    message,
                    cause: None,
                }
            }
            None => Throwable::runtime(format!(
                "Unknown exception code: {} msg {}",
                code,
                message.as_deref().unwrap_or("null")
            )),
        };
        Ok(Some(exception))
    }

    /// [`read_exception`](Self::read_exception), throwing what was read
    pub fn check_exception(&mut self) -> Result<(), InvokeError> {
        match self.read_exception()? {
            Some(exception) => Err(InvokeError::Thrown(exception)),
            None => Ok(()),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    fn write_padded(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
        let padding = padded_len(bytes.len()) - bytes.len();
        self.write_bytes(&[0u8; 3][..padding]);
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ParcelError> {
        let end = self.position + N;
        let slice = self
            .data
            .get(self.position..end)
            .ok_or(ParcelError::Underflow(N, self.position))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.position = end;
        Ok(out)
    }

    fn read_padded(&mut self, len: usize) -> Result<Vec<u8>, ParcelError> {
        let padded = padded_len(len);
        let end = self.position + padded;
        if end > self.data.len() {
            return Err(ParcelError::Underflow(padded, self.position));
        }
        let bytes = self.data[self.position..self.position + len].to_vec();
        self.position = end;
        Ok(bytes)
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn checked_len(len: i32) -> Result<usize, ParcelError> {
    usize::try_from(len).map_err(|_| ParcelError::NegativeLength(len))
}
