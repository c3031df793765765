use std::fmt;

use crate::error::{DbError, DbResult};

pub const ID_SIZE: usize = 4;
pub const NAME_SIZE: usize = 32;
pub const EMAIL_SIZE: usize = 256;
pub const ID_OFFSET: usize = 0;
pub const NAME_OFFSET: usize = ID_OFFSET + ID_SIZE;
pub const EMAIL_OFFSET: usize = NAME_OFFSET + NAME_SIZE;
pub const ROW_SIZE: usize = ID_SIZE + NAME_SIZE + EMAIL_SIZE;

/// A single table row: an `i32` key and two fixed-width byte columns,
/// right-padded with NUL bytes. Serialised width is exactly `ROW_SIZE`
/// (292) bytes, big-endian id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub id: i32,
    pub name: [u8; NAME_SIZE],
    pub email: [u8; EMAIL_SIZE],
}

impl Default for Row {
    fn default() -> Self {
        Row {
            id: 0,
            name: [0; NAME_SIZE],
            email: [0; EMAIL_SIZE],
        }
    }
}

impl Row {
    /// Build a row from string columns, rejecting values that do not fit
    /// their fixed-width buffers.
    pub fn new(id: i32, name: &str, email: &str) -> DbResult<Self> {
        if name.len() > NAME_SIZE {
            return Err(DbError::NameTooLong);
        }
        if email.len() > EMAIL_SIZE {
            return Err(DbError::EmailTooLong);
        }
        let mut row = Row {
            id,
            ..Row::default()
        };
        row.name[..name.len()].copy_from_slice(name.as_bytes());
        row.email[..email.len()].copy_from_slice(email.as_bytes());
        Ok(row)
    }

    /// Name column with the trailing NUL padding trimmed.
    pub fn name_str(&self) -> String {
        trim_padding(&self.name)
    }

    /// Email column with the trailing NUL padding trimmed.
    pub fn email_str(&self) -> String {
        trim_padding(&self.email)
    }

    /// Serialize into `buf[..ROW_SIZE]`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[ID_OFFSET..ID_OFFSET + ID_SIZE].copy_from_slice(&self.id.to_be_bytes());
        buf[NAME_OFFSET..NAME_OFFSET + NAME_SIZE].copy_from_slice(&self.name);
        buf[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE].copy_from_slice(&self.email);
    }

    /// Deserialize from `buf[..ROW_SIZE]`.
    pub fn read_from(buf: &[u8]) -> Row {
        let mut row = Row::default();
        let id_bytes = &buf[ID_OFFSET..ID_OFFSET + ID_SIZE];
        row.id = i32::from_be_bytes(id_bytes.try_into().unwrap());
        row.name.copy_from_slice(&buf[NAME_OFFSET..NAME_OFFSET + NAME_SIZE]);
        row.email.copy_from_slice(&buf[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE]);
        row
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.name_str(), self.email_str())
    }
}

fn trim_padding(column: &[u8]) -> String {
    let end = column.iter().position(|&b| b == 0).unwrap_or(column.len());
    String::from_utf8_lossy(&column[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_pads_columns() {
        let row = Row::new(7, "john", "john@example.com").unwrap();
        assert_eq!(row.id, 7);
        assert_eq!(row.name_str(), "john");
        assert_eq!(row.email_str(), "john@example.com");
        assert_eq!(&row.name[4..], &[0u8; NAME_SIZE - 4][..]);
    }

    #[test]
    fn rejects_oversize_columns() {
        let long_name = "x".repeat(NAME_SIZE + 1);
        assert!(matches!(
            Row::new(1, &long_name, "a@b"),
            Err(DbError::NameTooLong)
        ));
        let long_email = "y".repeat(EMAIL_SIZE + 1);
        assert!(matches!(
            Row::new(1, "ok", &long_email),
            Err(DbError::EmailTooLong)
        ));
        // exactly at the limit is accepted
        assert!(Row::new(1, &"x".repeat(NAME_SIZE), &"y".repeat(EMAIL_SIZE)).is_ok());
    }

    #[test]
    fn serialization_round_trip() {
        let row = Row::new(-42, "name-{1}", "name-{1}@example.com").unwrap();
        let mut buf = [0u8; ROW_SIZE];
        row.write_to(&mut buf);
        assert_eq!(Row::read_from(&buf), row);
    }

    #[test]
    fn display_trims_padding() {
        let row = Row::new(1, "john", "john@example.com").unwrap();
        assert_eq!(row.to_string(), "(1, john, john@example.com)");
    }
}
