//! Maps the header row of a source file onto canonical column names.
//!
//! Spreadsheet headers drift between exports (`Código`, `codigo `, `COD_SDP`),
//! so every canonical column carries a list of accepted aliases and is matched
//! in two passes: case-insensitive equality first, then equality after
//! [`fold_for_compare`]. Header tokens that match nothing are reported but
//! never fatal; their columns are simply ignored.

use std::collections::BTreeMap;

use crate::{io_utils::CsvRow, normalize::fold_for_compare};

/// A canonical column and the header spellings it accepts.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

impl ColumnSpec {
    pub const fn new(name: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { name, aliases }
    }

    fn candidates(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeaderMapping {
    positions: BTreeMap<&'static str, usize>,
    tokens: Vec<String>,
    unmapped: Vec<String>,
    missing: Vec<&'static str>,
}

impl HeaderMapping {
    pub fn synchronize(header: &[String], canonical: &[ColumnSpec]) -> Self {
        let mut claimed = vec![false; header.len()];
        let mut positions = BTreeMap::new();
        let mut missing = Vec::new();

        for column in canonical {
            let found = find_exact(header, &claimed, column)
                .or_else(|| find_normalized(header, &claimed, column));
            match found {
                Some(idx) => {
                    claimed[idx] = true;
                    positions.insert(column.name, idx);
                }
                None => missing.push(column.name),
            }
        }

        let unmapped = header
            .iter()
            .zip(&claimed)
            .filter(|(token, claimed)| !**claimed && !token.trim().is_empty())
            .map(|(token, _)| token.clone())
            .collect();

        Self {
            positions,
            tokens: header.to_vec(),
            unmapped,
            missing,
        }
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// Trimmed value of `column` in `row`; `None` when absent or blank.
    pub fn value<'r>(&self, row: &'r CsvRow, column: &str) -> Option<&'r str> {
        self.index_of(column)
            .and_then(|idx| row.get(idx))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Header token to canonical column, in header order.
    pub(crate) fn token_map(&self) -> Vec<(&str, &'static str)> {
        let mut pairs: Vec<(usize, &'static str)> = self
            .positions
            .iter()
            .map(|(column, idx)| (*idx, *column))
            .collect();
        pairs.sort_unstable();
        pairs
            .into_iter()
            .map(|(idx, column)| (self.tokens[idx].as_str(), column))
            .collect()
    }

    /// Header tokens that matched no canonical column.
    pub fn unmapped(&self) -> &[String] {
        &self.unmapped
    }

    /// Canonical columns with no matching header token.
    pub fn missing(&self) -> &[&'static str] {
        &self.missing
    }
}

fn find_exact(header: &[String], claimed: &[bool], column: &ColumnSpec) -> Option<usize> {
    column.candidates().find_map(|candidate| {
        let wanted = candidate.to_lowercase();
        header
            .iter()
            .enumerate()
            .position(|(idx, token)| !claimed[idx] && token.trim().to_lowercase() == wanted)
    })
}

fn find_normalized(header: &[String], claimed: &[bool], column: &ColumnSpec) -> Option<usize> {
    let folded: Vec<String> = header.iter().map(|token| fold_for_compare(token)).collect();
    column.candidates().find_map(|candidate| {
        let wanted = fold_for_compare(candidate);
        folded
            .iter()
            .enumerate()
            .position(|(idx, token)| !claimed[idx] && *token == wanted)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[ColumnSpec] = &[
        ColumnSpec::new("Id", &[]),
        ColumnSpec::new("codigo_sag", &["codigo", "cod_sag"]),
        ColumnSpec::new("cod_sdp_sag", &["cod_sdp"]),
    ];

    fn header(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn matches_case_insensitively_and_through_aliases() {
        let mapping = HeaderMapping::synchronize(&header(&["ID", "Codigo", "COD_SDP"]), COLUMNS);
        assert_eq!(mapping.index_of("Id"), Some(0));
        assert_eq!(mapping.index_of("codigo_sag"), Some(1));
        assert_eq!(mapping.index_of("cod_sdp_sag"), Some(2));
        assert!(mapping.unmapped().is_empty());
        assert!(mapping.missing().is_empty());
    }

    #[test]
    fn matches_after_folding_accents_and_whitespace() {
        let mapping =
            HeaderMapping::synchronize(&header(&[" Código ", "\u{feff}Id", "Comentario"]), COLUMNS);
        assert_eq!(mapping.index_of("codigo_sag"), Some(0));
        assert_eq!(mapping.index_of("Id"), Some(1));
        assert_eq!(mapping.unmapped(), ["Comentario".to_string()]);
        assert_eq!(mapping.missing(), ["cod_sdp_sag"]);
        assert_eq!(
            mapping.token_map(),
            vec![(" Código ", "codigo_sag"), ("\u{feff}Id", "Id")]
        );
    }

    #[test]
    fn a_token_is_claimed_once() {
        let columns = &[
            ColumnSpec::new("nombre", &[]),
            ColumnSpec::new("nom_cod", &["nombre"]),
        ];
        let mapping = HeaderMapping::synchronize(&header(&["nombre"]), columns);
        assert_eq!(mapping.index_of("nombre"), Some(0));
        assert_eq!(mapping.index_of("nom_cod"), None);
    }

    #[test]
    fn value_trims_and_treats_blank_as_absent() {
        let mapping = HeaderMapping::synchronize(&header(&["Id", "codigo_sag"]), COLUMNS);
        let row = CsvRow {
            line: 2,
            fields: vec![" 4 ".into(), "   ".into()],
        };
        assert_eq!(mapping.value(&row, "Id"), Some("4"));
        assert_eq!(mapping.value(&row, "codigo_sag"), None);
        assert_eq!(mapping.value(&row, "cod_sdp_sag"), None);
    }
}
