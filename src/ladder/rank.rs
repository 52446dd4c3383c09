//! Escalafón docente: la escalera fija de seis categorías.
//!
//! El orden de las variantes de [`Rank`] es el orden de promoción. "Siguiente
//! categoría" y "todavía puede ascender" se derivan de la posición en
//! [`Rank::LADDER`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// One step of the faculty rank ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    TitularAuxiliar1,
    TitularAuxiliar2,
    TitularAgregado1,
    TitularAgregado2,
    TitularAgregado3,
    TitularPrincipal1,
}

impl Rank {
    /// The whole ladder, lowest rank first.
    pub const LADDER: [Rank; 6] = [
        Rank::TitularAuxiliar1,
        Rank::TitularAuxiliar2,
        Rank::TitularAgregado1,
        Rank::TitularAgregado2,
        Rank::TitularAgregado3,
        Rank::TitularPrincipal1,
    ];

    /// Zero-based position in [`Rank::LADDER`].
    pub fn position(self) -> usize {
        Self::LADDER
            .iter()
            .position(|r| *r == self)
            .unwrap_or_default()
    }

    /// The rank immediately above this one, `None` at the top.
    pub fn next(self) -> Option<Rank> {
        Self::LADDER.get(self.position() + 1).copied()
    }

    pub fn can_be_promoted(self) -> bool {
        self.next().is_some()
    }

    /// Official name as it appears in faculty records.
    pub fn name(self) -> &'static str {
        match self {
            Rank::TitularAuxiliar1 => "Titular Auxiliar 1",
            Rank::TitularAuxiliar2 => "Titular Auxiliar 2",
            Rank::TitularAgregado1 => "Titular Agregado 1",
            Rank::TitularAgregado2 => "Titular Agregado 2",
            Rank::TitularAgregado3 => "Titular Agregado 3",
            Rank::TitularPrincipal1 => "Titular Principal 1",
        }
    }

    // Normalised key searched for inside free-text rank names.
    fn match_key(self) -> &'static str {
        match self {
            Rank::TitularAuxiliar1 => "auxiliar 1",
            Rank::TitularAuxiliar2 => "auxiliar 2",
            Rank::TitularAgregado1 => "agregado 1",
            Rank::TitularAgregado2 => "agregado 2",
            Rank::TitularAgregado3 => "agregado 3",
            Rank::TitularPrincipal1 => "principal 1",
        }
    }

    /// Matches a free-text rank name against the ladder.
    ///
    /// The input is lower-cased, accent-folded and whitespace-collapsed, then
    /// searched for each ladder key as a substring. Spacing between the word
    /// and the level number is optional (`"Agregado1"` matches).
    pub fn parse(input: &str) -> Option<Rank> {
        let normalized = normalize(input);
        let compact: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();

        Self::LADDER.iter().copied().find(|rank| {
            let key = rank.match_key();
            let compact_key: String = key.chars().filter(|c| !c.is_whitespace()).collect();
            normalized.contains(key) || compact.contains(&compact_key)
        })
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lower-cases, strips Spanish accents and collapses runs of whitespace.
pub(crate) fn normalize(input: &str) -> String {
    let folded: String = input
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
