use std::collections::HashMap;

/// Logical columns of a trade schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CurrencyPair,
    Side,
    Quantity,
    EntryTime,
    ExitTime,
    Price,
    Status,
    Executed,
    Closed,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::CurrencyPair,
        Field::Side,
        Field::Quantity,
        Field::EntryTime,
        Field::ExitTime,
        Field::Price,
        Field::Status,
        Field::Executed,
        Field::Closed,
    ];

    /// Accepted header names, primary language first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::CurrencyPair => &["通貨ペア", "currency_pair"],
            Field::Side => &["方向", "direction", "売買", "side"],
            Field::Quantity => &["数量", "quantity"],
            Field::EntryTime => &["エントリー時刻", "entry_time", "エントリー時間"],
            Field::ExitTime => &["クローズ時刻", "exit_time", "決済時間"],
            Field::Price => &["価格", "price"],
            Field::Status => &["ステータス", "status"],
            Field::Executed => &["実行済み", "executed"],
            Field::Closed => &["決済済み", "closed"],
        }
    }

    /// Value assumed when the column is absent from the source.
    pub fn absent_default(self) -> Option<&'static str> {
        match self {
            Field::Side => Some("long"),
            Field::Status => Some("pending"),
            Field::Executed | Field::Closed => Some("no"),
            _ => None,
        }
    }
}

/// Header positions of each logical field, resolved once per load.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    positions: HashMap<Field, usize>,
    width: usize,
}

impl ColumnMap {
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Self {
        let normalized: Vec<&str> = headers
            .iter()
            .map(|header| header.as_ref().trim().trim_start_matches('\u{feff}'))
            .collect();

        let mut positions = HashMap::new();
        for field in Field::ALL {
            let found = field
                .aliases()
                .iter()
                .find_map(|alias| normalized.iter().position(|header| header == alias));

            if let Some(index) = found {
                positions.insert(field, index);
            }
        }

        Self {
            positions,
            width: headers.len(),
        }
    }

    pub fn position(&self, field: Field) -> Option<usize> {
        self.positions.get(&field).copied()
    }

    pub fn has(&self, field: Field) -> bool {
        self.positions.contains_key(&field)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row<'a, S: AsRef<str>>(&'a self, cells: &'a [S]) -> RawRow<'a, S> {
        RawRow {
            columns: self,
            cells,
        }
    }
}

/// One data row viewed through a [`ColumnMap`].
pub struct RawRow<'a, S> {
    columns: &'a ColumnMap,
    cells: &'a [S],
}

impl<'a, S: AsRef<str>> RawRow<'a, S> {
    /// `None` when the column is missing from the header, otherwise the cell
    /// text (empty for short rows).
    pub fn get(&self, field: Field) -> Option<&'a str> {
        let index = self.columns.position(field)?;

        Some(self.cells.get(index).map(|cell| cell.as_ref()).unwrap_or(""))
    }

    pub fn get_or_default(&self, field: Field) -> Option<&'a str> {
        self.get(field).or_else(|| field.absent_default())
    }
}
