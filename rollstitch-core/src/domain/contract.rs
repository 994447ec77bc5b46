//! Contract codes, month letters and the closed set of supported products.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the two legs of a calendar-spread symbol (`ESH5-ESM5`).
pub const SPREAD_SEPARATOR: char = '-';

/// True if `symbol` names a calendar spread rather than an outright contract.
pub fn is_calendar_spread(symbol: &str) -> bool {
    symbol.contains(SPREAD_SEPARATOR)
}

#[derive(Debug, Error, PartialEq)]
pub enum ContractError {
    #[error("contract code too short: '{0}'")]
    TooShort(String),

    #[error("unknown month letter '{letter}' in contract '{code}'")]
    UnknownMonth { code: String, letter: char },

    #[error("invalid year digit in contract '{0}'")]
    InvalidYear(String),

    #[error("calendar spread is not an outright contract: '{0}'")]
    CalendarSpread(String),

    #[error("unknown product '{0}' (expected es or nq)")]
    UnknownProduct(String),
}

/// CME delivery-month letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MonthCode {
    F,
    G,
    H,
    J,
    K,
    M,
    N,
    Q,
    U,
    V,
    X,
    Z,
}

impl MonthCode {
    const ALL: [MonthCode; 12] = [
        MonthCode::F,
        MonthCode::G,
        MonthCode::H,
        MonthCode::J,
        MonthCode::K,
        MonthCode::M,
        MonthCode::N,
        MonthCode::Q,
        MonthCode::U,
        MonthCode::V,
        MonthCode::X,
        MonthCode::Z,
    ];

    /// Calendar month, 1 = January.
    pub fn month(self) -> u32 {
        self as u32 + 1
    }

    pub fn letter(self) -> char {
        match self {
            MonthCode::F => 'F',
            MonthCode::G => 'G',
            MonthCode::H => 'H',
            MonthCode::J => 'J',
            MonthCode::K => 'K',
            MonthCode::M => 'M',
            MonthCode::N => 'N',
            MonthCode::Q => 'Q',
            MonthCode::U => 'U',
            MonthCode::V => 'V',
            MonthCode::X => 'X',
            MonthCode::Z => 'Z',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.letter() == letter)
    }

    pub fn from_month(month: u32) -> Option<Self> {
        Self::ALL.get(month.checked_sub(1)? as usize).copied()
    }

    /// Quarterly month whose contract is front for calendar `month`.
    pub fn quarter_for_month(month: u32) -> Self {
        match month {
            0..=3 => MonthCode::H,
            4..=6 => MonthCode::M,
            7..=9 => MonthCode::U,
            _ => MonthCode::Z,
        }
    }
}

/// Outright contract code: root + month letter + single year digit (`ESH5`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractCode {
    pub root: String,
    pub month: MonthCode,
    pub year_digit: u8,
}

impl ContractCode {
    pub fn parse(code: &str) -> Result<Self, ContractError> {
        if is_calendar_spread(code) {
            return Err(ContractError::CalendarSpread(code.to_string()));
        }
        let chars: Vec<char> = code.chars().collect();
        if chars.len() < 3 {
            return Err(ContractError::TooShort(code.to_string()));
        }
        let year = chars[chars.len() - 1]
            .to_digit(10)
            .ok_or_else(|| ContractError::InvalidYear(code.to_string()))?;
        let letter = chars[chars.len() - 2];
        let month = MonthCode::from_letter(letter).ok_or(ContractError::UnknownMonth {
            code: code.to_string(),
            letter,
        })?;
        let root: String = chars[..chars.len() - 2].iter().collect();
        Ok(Self {
            root,
            month,
            year_digit: year as u8,
        })
    }

    /// The next quarterly contract after this one (`ESZ4` -> `ESH5`).
    pub fn next_quarterly(&self) -> Self {
        let (month, roll_year) = match self.month {
            m if m < MonthCode::H => (MonthCode::H, false),
            m if m < MonthCode::M => (MonthCode::M, false),
            m if m < MonthCode::U => (MonthCode::U, false),
            m if m < MonthCode::Z => (MonthCode::Z, false),
            _ => (MonthCode::H, true),
        };
        let year_digit = self.year_digit % 10;
        let year_digit = if roll_year {
            (year_digit + 1) % 10
        } else {
            year_digit
        };
        Self {
            root: self.root.clone(),
            month,
            year_digit,
        }
    }
}

impl fmt::Display for ContractCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.root, self.month.letter(), self.year_digit)
    }
}

/// Supported futures products. Each carries its own naming and file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Es,
    Nq,
}

impl Product {
    /// Contract root symbol.
    pub fn root(self) -> &'static str {
        match self {
            Product::Es => "ES",
            Product::Nq => "NQ",
        }
    }

    /// Lowercase directory name used in the data layout.
    pub fn dir_name(self) -> &'static str {
        match self {
            Product::Es => "es",
            Product::Nq => "nq",
        }
    }

    /// Synthetic symbol written on every continuous bar.
    pub fn continuous_symbol(self) -> &'static str {
        match self {
            Product::Es => "ES_continuous",
            Product::Nq => "NQ_continuous",
        }
    }

    /// Minimum price increment in index points.
    pub fn tick_size(self) -> f64 {
        0.25
    }

    /// True if `contract` is an outright of this product.
    pub fn owns(self, contract: &str) -> bool {
        ContractCode::parse(contract)
            .map(|c| c.root == self.root())
            .unwrap_or(false)
    }

    /// Quarterly contract nominally front for `date` (by calendar quarter).
    pub fn front_quarterly_contract(self, date: NaiveDate) -> ContractCode {
        ContractCode {
            root: self.root().to_string(),
            month: MonthCode::quarter_for_month(date.month()),
            year_digit: (date.year().rem_euclid(10)) as u8,
        }
    }
}

impl FromStr for Product {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "es" => Ok(Product::Es),
            "nq" => Ok(Product::Nq),
            _ => Err(ContractError::UnknownProduct(s.to_string())),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
