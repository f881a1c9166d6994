use crate::constants::{PATH_SENTINEL, RECORD_DELIMITER};

/// One input line split on its last `;` into log content and trailing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub line: &'a str,
    pub content: &'a str,
    pub path_suffix: &'a str,
    has_delimiter: bool,
}

impl<'a> Record<'a> {
    pub fn split(line: &'a str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.rfind(RECORD_DELIMITER) {
            Some(idx) => Self {
                line,
                content: &line[..idx],
                path_suffix: &line[idx + RECORD_DELIMITER.len_utf8()..],
                has_delimiter: true,
            },
            None => Self {
                line,
                content: line,
                path_suffix: PATH_SENTINEL,
                has_delimiter: false,
            },
        }
    }

    pub fn is_blank(&self) -> bool {
        self.line.trim().is_empty()
    }

    pub fn has_delimiter(&self) -> bool {
        self.has_delimiter
    }

    /// Byte offset in `line` where the path suffix begins. Offsets below
    /// `content_len()` belong to the content.
    pub fn content_len(&self) -> usize {
        self.content.len()
    }

    pub fn in_content(&self, offset: usize) -> bool {
        offset < self.content.len()
    }
}

pub fn split_record(line: &str) -> (&str, &str) {
    let record = Record::split(line);
    (record.content, record.path_suffix)
}
