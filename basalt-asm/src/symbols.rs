use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Element type of a data or bss definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Undefined,
    Byte,
    Word,
    DWord,
    QWord,
}

impl DataType {
    pub fn from_directive(name: &str) -> Option<DataType> {
        match name.to_ascii_lowercase().as_str() {
            "byte" => Some(DataType::Byte),
            "word" => Some(DataType::Word),
            "dword" => Some(DataType::DWord),
            "qword" => Some(DataType::QWord),
            _ => None,
        }
    }

    /// Element size in bytes.
    pub fn size(self) -> u64 {
        match self {
            DataType::Undefined => 0,
            DataType::Byte => 1,
            DataType::Word => 2,
            DataType::DWord => 4,
            DataType::QWord => 8,
        }
    }
}

/// A named data, bss or constant definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfo {
    /// Offset from `ds` of the first byte.
    pub offset: u64,
    /// Total size in bytes.
    pub size: u64,
    /// Value of a constant.
    pub value: u64,
    pub constant: bool,
    pub data_type: DataType,
}

impl DataInfo {
    pub fn constant(value: u64) -> Self {
        Self {
            offset: 0,
            size: DataType::QWord.size(),
            value,
            constant: true,
            data_type: DataType::QWord,
        }
    }

    pub fn variable(offset: u64, size: u64, data_type: DataType) -> Self {
        Self {
            offset,
            size,
            value: 0,
            constant: false,
            data_type,
        }
    }

    /// Number of elements.
    pub fn length(&self) -> u64 {
        match self.data_type.size() {
            0 => 0,
            elem => self.size / elem,
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, DataInfo>,
}

impl SymbolTable {
    /// Returns `false` and leaves the table untouched when `name` is taken.
    pub fn define(&mut self, name: &str, info: DataInfo) -> bool {
        match self.symbols.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(info);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&DataInfo> {
        self.symbols.get(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }
}

/// A global label and the local labels scoped under it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Label {
    pub index: usize,
    pub locals: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct LabelTable {
    labels: HashMap<String, Label>,
}

impl LabelTable {
    /// Returns `false` when the global label already exists.
    pub fn define_global(&mut self, name: &str, index: usize) -> bool {
        match self.labels.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Label {
                    index,
                    locals: HashMap::new(),
                });
                true
            }
        }
    }

    /// Returns `false` when `parent` is unknown or already owns `name`.
    pub fn define_local(&mut self, parent: &str, name: &str, index: usize) -> bool {
        let Some(label) = self.labels.get_mut(parent) else {
            return false;
        };
        match label.locals.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(index);
                true
            }
        }
    }

    pub fn global(&self, name: &str) -> Option<usize> {
        self.labels.get(name).map(|label| label.index)
    }

    pub fn local(&self, parent: &str, name: &str) -> Option<usize> {
        self.labels.get(parent)?.locals.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }
}
