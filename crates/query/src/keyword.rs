//! Substring matching over a record's searchable text.
//!
//! Candidates, in order: the item name, then the payload's `inputCode` and
//! `inputCodeWb`. A missing candidate is the empty string.

use storage::Record;

use crate::types::AuxFieldMode;

/// A prepared keyword predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatcher {
    needle: String,
    case_sensitive: bool,
    aux_mode: AuxFieldMode,
}

impl KeywordMatcher {
    /// An absent keyword matches every record.
    pub fn new(keyword: Option<&str>, case_sensitive: bool, aux_mode: AuxFieldMode) -> Self {
        let keyword = keyword.unwrap_or_default();
        let needle = if case_sensitive {
            keyword.to_string()
        } else {
            keyword.to_uppercase()
        };
        Self {
            needle,
            case_sensitive,
            aux_mode,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        let name = record.item_name.as_str();
        let code = record.input_code().unwrap_or_default();
        let code_wb = self.second_aux(record);

        if self.case_sensitive {
            [name, code, code_wb.as_str()]
                .iter()
                .any(|field| field.contains(&self.needle))
        } else {
            [name, code, code_wb.as_str()]
                .iter()
                .any(|field| field.to_uppercase().contains(&self.needle))
        }
    }

    fn second_aux(&self, record: &Record) -> String {
        let own = record.input_code_wb().unwrap_or_default();
        match self.aux_mode {
            AuxFieldMode::Own => own.to_string(),
            // Only the case-insensitive path ever read the first field.
            AuxFieldMode::MirrorInputCode if !self.case_sensitive && !own.is_empty() => {
                record.input_code().unwrap_or_default().to_string()
            }
            AuxFieldMode::MirrorInputCode => own.to_string(),
        }
    }
}

/// One-shot form of [`KeywordMatcher::matches`].
pub fn matches_keyword(record: &Record, keyword: Option<&str>, case_sensitive: bool) -> bool {
    KeywordMatcher::new(keyword, case_sensitive, AuxFieldMode::Own).matches(record)
}
