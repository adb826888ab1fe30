use std::collections::HashMap;

use crate::errors::{ErrorKind, JobError};
use crate::models::{CreatePortfolio, Holding};
use crate::services::workbook::SheetBlock;

/// Canonical column roles the holdings table must expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    Name,
    Isin,
    NavPercent,
}

/// Deterministic statement parser: normalizes header synonyms to canonical
/// columns, then extracts holdings row by row.
#[derive(Clone)]
pub struct ManualParser {
    synonyms: HashMap<String, Column>,
}

impl Default for ManualParser {
    fn default() -> Self {
        let mut synonyms = HashMap::new();
        for key in [
            "name of instrument",
            "name of the instrument",
            "instrument",
            "security name",
            "company",
            "holding",
            "stock name",
        ] {
            synonyms.insert(key.to_string(), Column::Name);
        }
        for key in ["isin", "isin code", "isin_code"] {
            synonyms.insert(key.to_string(), Column::Isin);
        }
        for key in [
            "% to nav",
            "percentage to nav",
            "percentage_to_nav",
            "% of nav",
            "weight",
            "allocation",
            "portfolio %",
            "%",
        ] {
            synonyms.insert(key.to_string(), Column::NavPercent);
        }
        Self { synonyms }
    }
}

impl ManualParser {
    /// Extend or override the synonym dictionary.
    pub fn with_synonyms(mut self, extra: &HashMap<String, String>) -> Self {
        for (synonym, canonical) in extra {
            let column = match canonical.as_str() {
                "name_of_instrument" => Column::Name,
                "isin_code" => Column::Isin,
                "percentage_to_nav" => Column::NavPercent,
                _ => continue,
            };
            self.synonyms.insert(synonym.trim().to_lowercase(), column);
        }
        self
    }

    /// Parse one sheet into a portfolio.
    ///
    /// Rows above the header row are treated as preamble; `Fund Name` /
    /// `Portfolio Date` style label rows fill the natural key. When the
    /// preamble does not name the fund, the sheet name stands in.
    pub fn parse(&self, sheet: &SheetBlock) -> Result<CreatePortfolio, JobError> {
        let header_at = self.find_header_row(sheet).ok_or_else(|| {
            JobError::new(
                ErrorKind::ParseSheet,
                format!("sheet '{}' has no recognizable holdings table", sheet.name),
            )
        })?;

        let (fund_name, portfolio_date) = scan_preamble(&sheet.rows[..header_at]);
        let columns = self.map_columns(&sheet.rows[header_at]);

        let name_col = columns[&Column::Name];
        let isin_col = columns[&Column::Isin];
        let pct_col = columns.get(&Column::NavPercent).copied();

        let mut holdings = Vec::new();
        for row in &sheet.rows[header_at + 1..] {
            let name = cell(row, name_col);
            let isin = cell(row, isin_col);
            if name.is_empty() && isin.is_empty() {
                continue;
            }
            // Sub-totals and section banners have no ISIN
            if isin.is_empty() {
                continue;
            }
            holdings.push(Holding {
                name_of_instrument: name,
                isin_code: isin,
                percentage_to_nav: pct_col.map(|i| cell(row, i)).unwrap_or_default(),
            });
        }

        if holdings.is_empty() {
            return Err(JobError::new(
                ErrorKind::ParseSheet,
                format!("sheet '{}' has a header but no holdings rows", sheet.name),
            ));
        }

        Ok(CreatePortfolio {
            mutual_fund_name: fund_name.unwrap_or_else(|| sheet.name.clone()),
            portfolio_date: portfolio_date.unwrap_or_else(|| "unknown".to_string()),
            portfolio_holdings: holdings,
        })
    }

    /// A header row is one where at least a name and an ISIN column resolve.
    fn find_header_row(&self, sheet: &SheetBlock) -> Option<usize> {
        sheet.rows.iter().position(|row| {
            let mapped = self.map_columns(row);
            mapped.contains_key(&Column::Name) && mapped.contains_key(&Column::Isin)
        })
    }

    fn map_columns(&self, row: &[String]) -> HashMap<Column, usize> {
        let mut mapped = HashMap::new();
        for (i, header) in row.iter().enumerate() {
            if let Some(column) = self.synonyms.get(header.trim().to_lowercase().as_str()) {
                mapped.entry(*column).or_insert(i);
            }
        }
        mapped
    }
}

fn cell(row: &[String], index: usize) -> String {
    row.get(index).cloned().unwrap_or_default()
}

/// Pull fund name and statement date out of label/value preamble rows.
fn scan_preamble(rows: &[Vec<String>]) -> (Option<String>, Option<String>) {
    let mut fund_name = None;
    let mut portfolio_date = None;
    for row in rows {
        if row.len() < 2 {
            continue;
        }
        let label = row[0].to_lowercase();
        let value = row[1].trim();
        if value.is_empty() {
            continue;
        }
        if fund_name.is_none() && label.contains("fund") {
            fund_name = Some(value.to_string());
        } else if portfolio_date.is_none() && (label.contains("date") || label.contains("as on")) {
            portfolio_date = Some(value.to_string());
        }
    }
    (fund_name, portfolio_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: Vec<Vec<&str>>) -> SheetBlock {
        SheetBlock {
            index: 0,
            name: "YO01".to_string(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    #[test]
    fn parses_statement_with_preamble() {
        let block = sheet(vec![
            vec!["Fund Name", "Alpha Midcap Fund"],
            vec!["Portfolio Date", "March 2025"],
            vec!["Name of Instrument", "ISIN", "% to NAV"],
            vec!["Multi Commodity Exchange of India Limited", "INE745G01035", "0.0159%"],
            vec!["Kaynes Technology India Limited", "INE918Z01012", "0.0231%"],
        ]);

        let portfolio = ManualParser::default().parse(&block).unwrap();
        assert_eq!(portfolio.mutual_fund_name, "Alpha Midcap Fund");
        assert_eq!(portfolio.portfolio_date, "March 2025");
        assert_eq!(portfolio.portfolio_holdings.len(), 2);
        assert_eq!(
            portfolio.portfolio_holdings[0].percentage_to_nav,
            "0.0159%"
        );
    }

    #[test]
    fn header_synonyms_are_case_insensitive() {
        let block = sheet(vec![
            vec!["SECURITY NAME", "Isin Code", "Weight"],
            vec!["Reliance Industries", "INE002A01018", "9.1"],
        ]);

        let portfolio = ManualParser::default().parse(&block).unwrap();
        assert_eq!(portfolio.portfolio_holdings.len(), 1);
        assert_eq!(portfolio.portfolio_holdings[0].isin_code, "INE002A01018");
        // No preamble: sheet name becomes the fund name
        assert_eq!(portfolio.mutual_fund_name, "YO01");
    }

    #[test]
    fn rows_without_isin_are_skipped() {
        let block = sheet(vec![
            vec!["Name of Instrument", "ISIN", "% to NAV"],
            vec!["Equity & Equity Related", "", ""],
            vec!["Reliance Industries", "INE002A01018", "9.1%"],
            vec!["Sub Total", "", "99.5%"],
        ]);

        let portfolio = ManualParser::default().parse(&block).unwrap();
        assert_eq!(portfolio.portfolio_holdings.len(), 1);
    }

    #[test]
    fn sheet_without_table_is_a_parse_sheet_error() {
        let block = sheet(vec![
            vec!["Just", "some", "text"],
            vec!["1", "2", "3"],
        ]);

        let err = ManualParser::default().parse(&block).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseSheet);
    }

    #[test]
    fn custom_synonyms_extend_the_map() {
        let mut extra = HashMap::new();
        extra.insert("scrip".to_string(), "name_of_instrument".to_string());
        extra.insert("code".to_string(), "isin_code".to_string());
        let parser = ManualParser::default().with_synonyms(&extra);

        let block = sheet(vec![
            vec!["Scrip", "Code"],
            vec!["Reliance Industries", "INE002A01018"],
        ]);
        let portfolio = parser.parse(&block).unwrap();
        assert_eq!(portfolio.portfolio_holdings.len(), 1);
        assert_eq!(portfolio.portfolio_holdings[0].percentage_to_nav, "");
    }
}
