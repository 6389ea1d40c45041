//! Variant records and batches
//!
//! A [`VariantRecord`] wraps one tab-separated data line of a variant file
//! together with its position in the input stream. Field accessors borrow
//! from the raw line; annotation only ever rewrites the INFO column.

/// Number of fixed columns before the FORMAT column
pub const FIXED_COLUMNS: usize = 8;

const CHROM: usize = 0;
const POS: usize = 1;
const REF: usize = 3;
const ALT: usize = 4;
const INFO: usize = 7;
const FORMAT: usize = 8;

/// A single variant line plus its 0-based data-line ordinal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    ordinal: u64,
    line: String,
}
impl VariantRecord {
    /// Create a record from a raw line, trimming any trailing line ending
    pub fn new(ordinal: u64, line: impl Into<String>) -> Self {
        let mut line = line.into();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Self { ordinal, line }
    }

    /// Position of this record among the data lines of the input
    #[must_use]
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// The full line, without line ending
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    #[must_use]
    pub fn into_line(self) -> String {
        self.line
    }

    fn field(&self, idx: usize) -> Option<&str> {
        self.line.split('\t').nth(idx)
    }

    /// The chromosome label. Lines without tabs are their own label.
    #[must_use]
    pub fn chrom(&self) -> &str {
        self.field(CHROM).unwrap_or_default()
    }

    #[must_use]
    pub fn pos(&self) -> Option<u64> {
        self.field(POS).and_then(|p| p.parse().ok())
    }

    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.field(REF)
    }

    #[must_use]
    pub fn alternative(&self) -> Option<&str> {
        self.field(ALT)
    }

    /// The raw INFO column, if the line has one
    #[must_use]
    pub fn info(&self) -> Option<&str> {
        self.field(INFO)
    }

    /// Look up the value of an INFO entry
    ///
    /// Flag entries (no `=`) return an empty string.
    #[must_use]
    pub fn info_value(&self, key: &str) -> Option<&str> {
        self.info()?.split(';').find_map(|entry| {
            let (k, v) = entry.split_once('=').unwrap_or((entry, ""));
            (k == key).then_some(v)
        })
    }

    /// The FORMAT column keys
    #[must_use]
    pub fn format_keys(&self) -> Option<Vec<&str>> {
        self.field(FORMAT).map(|f| f.split(':').collect())
    }

    /// The per-sample genotype columns, in header order
    pub fn sample_columns(&self) -> impl Iterator<Item = &str> {
        self.line.split('\t').skip(FORMAT + 1)
    }

    /// Set, overwrite or (with `None`) remove an INFO entry
    ///
    /// Every other byte of the line is preserved. Records that are too short
    /// to carry an INFO column are padded with `.` columns first.
    pub fn set_info(&mut self, key: &str, value: Option<&str>) {
        let mut fields: Vec<&str> = self.line.split('\t').collect();
        while fields.len() <= INFO {
            fields.push(".");
        }

        let mut entries: Vec<String> = fields[INFO]
            .split(';')
            .filter(|e| !e.is_empty() && *e != ".")
            .map(str::to_string)
            .collect();

        let slot = entries
            .iter()
            .position(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key);
        let entry = value.map(|v| if v.is_empty() { key.to_string() } else { format!("{key}={v}") });
        match (slot, entry) {
            (Some(idx), Some(entry)) => entries[idx] = entry,
            (Some(idx), None) => {
                entries.remove(idx);
            }
            (None, Some(entry)) => entries.push(entry),
            (None, None) => return,
        }

        let info = if entries.is_empty() {
            ".".to_string()
        } else {
            entries.join(";")
        };
        fields[INFO] = &info;
        self.line = fields.join("\t");
    }

    /// Tag the record with an annotation failure
    pub fn tag_error(&mut self, code: &str) {
        self.set_info("GM_ERROR", Some(code));
    }
}

/// An ordered group of records annotated together by one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    id: u64,
    records: Vec<VariantRecord>,
}
impl Batch {
    #[must_use]
    pub fn new(id: u64, records: Vec<VariantRecord>) -> Self {
        Self { id, records }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[VariantRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [VariantRecord] {
        &mut self.records
    }

    pub fn push(&mut self, record: VariantRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn into_records(self) -> Vec<VariantRecord> {
        self.records
    }
}
