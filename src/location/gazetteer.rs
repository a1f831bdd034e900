//! Built-in gazetteer: an offline last-resort provider.
//!
//! Covers Indonesian provincial capitals, large cities and a few landmarks
//! that show up often in news content. Matching is exact/alias first, then
//! substring, then edit distance ≤ 2. Anything but an exact match is a
//! derived result and reports a lowered confidence.

use async_trait::async_trait;

use super::providers::GeocodeProvider;
use super::types::{Geocode, ProviderError, ProviderId, DEFAULT_CONFIDENCE};

/// Confidence reported for substring and fuzzy matches.
pub const DERIVED_CONFIDENCE: f64 = 0.7;

/// Shortest name allowed to take part in substring matching.
const MIN_SUBSTRING_LEN: usize = 4;

struct Place {
    names: &'static [&'static str], // canonical + aliases
    lat: f64,
    lng: f64,
    address: &'static str,
}

const PLACES: &[Place] = &[
    Place {
        names: &["monas", "monumen nasional"],
        lat: -6.1754, lng: 106.8272,
        address: "Monumen Nasional, Gambir, Jakarta Pusat, DKI Jakarta",
    },
    Place {
        names: &["jakarta", "dki jakarta", "batavia"],
        lat: -6.2088, lng: 106.8456,
        address: "Jakarta, DKI Jakarta",
    },
    Place {
        names: &["bandung"],
        lat: -6.9175, lng: 107.6191,
        address: "Bandung, Jawa Barat",
    },
    Place {
        names: &["bogor"],
        lat: -6.5971, lng: 106.8060,
        address: "Bogor, Jawa Barat",
    },
    Place {
        names: &["bekasi"],
        lat: -6.2383, lng: 106.9756,
        address: "Bekasi, Jawa Barat",
    },
    Place {
        names: &["depok"],
        lat: -6.4025, lng: 106.7942,
        address: "Depok, Jawa Barat",
    },
    Place {
        names: &["tangerang"],
        lat: -6.1783, lng: 106.6319,
        address: "Tangerang, Banten",
    },
    Place {
        names: &["serang"],
        lat: -6.1200, lng: 106.1503,
        address: "Serang, Banten",
    },
    Place {
        names: &["semarang"],
        lat: -6.9667, lng: 110.4167,
        address: "Semarang, Jawa Tengah",
    },
    Place {
        names: &["surakarta", "solo"],
        lat: -7.5755, lng: 110.8243,
        address: "Surakarta, Jawa Tengah",
    },
    Place {
        names: &["yogyakarta", "jogja", "jogjakarta", "yogya"],
        lat: -7.7956, lng: 110.3695,
        address: "Yogyakarta, DI Yogyakarta",
    },
    Place {
        names: &["surabaya"],
        lat: -7.2575, lng: 112.7521,
        address: "Surabaya, Jawa Timur",
    },
    Place {
        names: &["malang"],
        lat: -7.9666, lng: 112.6326,
        address: "Malang, Jawa Timur",
    },
    Place {
        names: &["denpasar"],
        lat: -8.6705, lng: 115.2126,
        address: "Denpasar, Bali",
    },
    Place {
        names: &["mataram"],
        lat: -8.5833, lng: 116.1167,
        address: "Mataram, Nusa Tenggara Barat",
    },
    Place {
        names: &["kupang"],
        lat: -10.1772, lng: 123.6070,
        address: "Kupang, Nusa Tenggara Timur",
    },
    Place {
        names: &["banda aceh"],
        lat: 5.5483, lng: 95.3238,
        address: "Banda Aceh, Aceh",
    },
    Place {
        names: &["medan"],
        lat: 3.5952, lng: 98.6722,
        address: "Medan, Sumatera Utara",
    },
    Place {
        names: &["padang"],
        lat: -0.9471, lng: 100.4172,
        address: "Padang, Sumatera Barat",
    },
    Place {
        names: &["pekanbaru"],
        lat: 0.5071, lng: 101.4478,
        address: "Pekanbaru, Riau",
    },
    Place {
        names: &["palembang"],
        lat: -2.9761, lng: 104.7754,
        address: "Palembang, Sumatera Selatan",
    },
    Place {
        names: &["bandar lampung", "lampung"],
        lat: -5.3971, lng: 105.2668,
        address: "Bandar Lampung, Lampung",
    },
    Place {
        names: &["pontianak"],
        lat: -0.0263, lng: 109.3425,
        address: "Pontianak, Kalimantan Barat",
    },
    Place {
        names: &["banjarmasin"],
        lat: -3.3186, lng: 114.5944,
        address: "Banjarmasin, Kalimantan Selatan",
    },
    Place {
        names: &["balikpapan"],
        lat: -1.2379, lng: 116.8529,
        address: "Balikpapan, Kalimantan Timur",
    },
    Place {
        names: &["samarinda"],
        lat: -0.5022, lng: 117.1536,
        address: "Samarinda, Kalimantan Timur",
    },
    Place {
        names: &["makassar", "ujung pandang"],
        lat: -5.1477, lng: 119.4327,
        address: "Makassar, Sulawesi Selatan",
    },
    Place {
        names: &["manado"],
        lat: 1.4748, lng: 124.8421,
        address: "Manado, Sulawesi Utara",
    },
    Place {
        names: &["palu"],
        lat: -0.8917, lng: 119.8707,
        address: "Palu, Sulawesi Tengah",
    },
    Place {
        names: &["ambon"],
        lat: -3.6954, lng: 128.1814,
        address: "Ambon, Maluku",
    },
    Place {
        names: &["jayapura"],
        lat: -2.5337, lng: 140.7181,
        address: "Jayapura, Papua",
    },
];

/// Largest edit distance accepted by the fuzzy pass.
const MAX_FUZZY_DISTANCE: usize = 2;

/// Levenshtein distance between `query` and `name`, or `None` once it is
/// certain to exceed `limit`.
fn bounded_distance(query: &str, name: &str, limit: usize) -> Option<usize> {
    let q: Vec<char> = query.chars().collect();
    let n: Vec<char> = name.chars().collect();
    if q.len().abs_diff(n.len()) > limit {
        return None;
    }

    let mut row: Vec<usize> = (0..=n.len()).collect();
    for (i, qc) in q.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        let mut row_min = row[0];
        for (j, nc) in n.iter().enumerate() {
            let substitute = diagonal + usize::from(qc != nc);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(diagonal + 1);
            row_min = row_min.min(row[j + 1]);
        }
        if row_min > limit {
            return None;
        }
    }
    Some(row[n.len()]).filter(|d| *d <= limit)
}

fn normalize(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_geocode(place: &Place, confidence: f64) -> Geocode {
    Geocode::new(place.lat, place.lng)
        .with_address(format!("{}, Indonesia", place.address))
        .with_confidence(confidence)
}

/// Search the built-in dataset.
pub fn lookup(query: &str) -> Option<Geocode> {
    let q = normalize(query);
    if q.is_empty() {
        return None;
    }

    // Exact match first
    for place in PLACES {
        if place.names.iter().any(|name| *name == q) {
            return Some(to_geocode(place, DEFAULT_CONFIDENCE));
        }
    }

    // Substring match. The leftmost mention wins ("monas, jakarta" is the
    // landmark, not the city); ties go to the longer name.
    let mut best: Option<(&Place, (usize, std::cmp::Reverse<usize>))> = None;
    for place in PLACES {
        for name in place.names {
            let position = if name.len() >= MIN_SUBSTRING_LEN {
                q.find(name)
            } else {
                None
            }
            .or_else(|| (q.len() >= MIN_SUBSTRING_LEN && name.contains(q.as_str())).then_some(0));

            if let Some(pos) = position {
                let rank = (pos, std::cmp::Reverse(name.len()));
                if best.map_or(true, |(_, r)| rank < r) {
                    best = Some((place, rank));
                }
            }
        }
    }
    if let Some((place, _)) = best {
        return Some(to_geocode(place, DERIVED_CONFIDENCE));
    }

    // Fuzzy match: closest name within MAX_FUZZY_DISTANCE, first listed on ties
    PLACES
        .iter()
        .flat_map(|place| place.names.iter().map(move |name| (place, *name)))
        .filter_map(|(place, name)| {
            bounded_distance(&q, name, MAX_FUZZY_DISTANCE).map(|d| (d, place))
        })
        .min_by_key(|(d, _)| *d)
        .map(|(_, place)| to_geocode(place, DERIVED_CONFIDENCE))
}

/// Provider wrapper over [`lookup`]. Always configured, never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinGazetteer;

impl BuiltinGazetteer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GeocodeProvider for BuiltinGazetteer {
    fn id(&self) -> ProviderId {
        ProviderId::Builtin
    }

    async fn resolve(&self, text: &str) -> Result<Geocode, ProviderError> {
        lookup(text).ok_or_else(|| ProviderError::NoResults {
            provider: ProviderId::Builtin,
            query: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        let g = lookup("Monas").unwrap();
        approx::assert_abs_diff_eq!(g.lat, -6.1754, epsilon = 1e-4);
        approx::assert_abs_diff_eq!(g.lng, 106.8272, epsilon = 1e-4);
        assert_eq!(g.confidence, DEFAULT_CONFIDENCE);
        assert!(g.formatted_address.unwrap().ends_with("Indonesia"));
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let g = lookup("  BANDA   Aceh ").unwrap();
        approx::assert_abs_diff_eq!(g.lat, 5.5483, epsilon = 1e-4);
    }

    #[test]
    fn test_alias() {
        let g = lookup("jogja").unwrap();
        approx::assert_abs_diff_eq!(g.lat, -7.7956, epsilon = 1e-4);
    }

    #[test]
    fn test_substring_is_derived() {
        let g = lookup("DPRD NTB, Mataram").unwrap();
        approx::assert_abs_diff_eq!(g.lat, -8.5833, epsilon = 1e-4);
        assert_eq!(g.confidence, DERIVED_CONFIDENCE);
    }

    #[test]
    fn test_substring_prefers_leftmost_mention() {
        let g = lookup("Monas, Jakarta Pusat").unwrap();
        approx::assert_abs_diff_eq!(g.lng, 106.8272, epsilon = 1e-4);
    }

    #[test]
    fn test_fuzzy() {
        // "surabya" → "surabaya" (edit distance 1)
        let g = lookup("surabya").unwrap();
        approx::assert_abs_diff_eq!(g.lat, -7.2575, epsilon = 1e-4);
        assert_eq!(g.confidence, DERIVED_CONFIDENCE);
    }

    #[test]
    fn test_not_found() {
        assert!(lookup("xyznonexistent").is_none());
        assert!(lookup("   ").is_none());
    }

    #[test]
    fn test_bounded_distance() {
        assert_eq!(bounded_distance("makasar", "makassar", 2), Some(1));
        assert_eq!(bounded_distance("palu", "palu", 2), Some(0));
        assert_eq!(bounded_distance("kitten", "sitting", 3), Some(3));
        assert_eq!(bounded_distance("kitten", "sitting", 2), None);
        // Length gap alone rules it out.
        assert_eq!(bounded_distance("medan", "banjarmasin", 2), None);
    }

    #[tokio::test]
    async fn test_provider_reports_no_results() {
        let err = BuiltinGazetteer::new().resolve("Atlantis").await.unwrap_err();
        assert_eq!(err.provider(), ProviderId::Builtin);
        assert!(matches!(err, ProviderError::NoResults { .. }));
    }
}
