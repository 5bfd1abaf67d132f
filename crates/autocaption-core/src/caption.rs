//! Caption synthesis from matched faces.
//!
//! Faces are culled tallest-first to the configured count, ordered left to
//! right, filtered for admissibility and joined into a sentence such as
//! `DA SX MARIO ROSSI LUCA BIANCHI E ANNA VERDI`. Team photos are split into a
//! standing and a crouching row, each captioned on its own.

use crate::config::CaptionConfig;
use crate::filter::{tallest_height, FaceFilter, GroupLookup};
use crate::types::DetectedFace;

/// Opening phrase and final-name joiner of a caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connectives {
    pub start: String,
    pub last: String,
}

impl Connectives {
    pub fn new(start: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            last: last.into(),
        }
    }

    /// "DA SX " / " E ".
    pub fn standard(title_case: bool) -> Self {
        if title_case {
            Self::new("Da sx ", " e ")
        } else {
            Self::new("DA SX ", " E ")
        }
    }

    /// Back row of a team photo.
    pub fn standing(title_case: bool) -> Self {
        if title_case {
            Self::new("In piedi da sx ", " ")
        } else {
            Self::new("IN PIEDI DA SX ", " ")
        }
    }

    /// Front row of a team photo.
    pub fn crouching(title_case: bool) -> Self {
        if title_case {
            Self::new("Accosciati da sx ", " ")
        } else {
            Self::new("ACCOSCIATI DA SX ", " ")
        }
    }
}

/// "MICHAEL JORDAN" -> "Michael Jordan".
pub fn to_title_case(name: &str) -> String {
    name.to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Admissible names, left to right, in the configured casing.
///
/// This is the single-row pipeline regardless of team mode; it feeds the
/// "persons in image" metadata field.
pub fn persons<G: GroupLookup + ?Sized>(
    faces: &[DetectedFace],
    config: &CaptionConfig,
    groups: &G,
) -> Vec<String> {
    let filter = FaceFilter::new(config, tallest_height(faces), groups);

    let mut by_height: Vec<&DetectedFace> = faces.iter().collect();
    by_height.sort_by(|a, b| b.bbox.height.total_cmp(&a.bbox.height));
    by_height.truncate(config.max_number_of_faces);

    let mut ranked: Vec<(usize, &DetectedFace)> = by_height.into_iter().enumerate().collect();
    ranked.sort_by(|(_, a), (_, b)| a.bbox.x.total_cmp(&b.bbox.x));

    ranked
        .into_iter()
        .filter(|(rank, face)| filter.evaluate(face, *rank).admissible)
        .filter_map(|(_, face)| face.name())
        .map(|name| {
            if config.use_title_case {
                to_title_case(name)
            } else {
                name.to_string()
            }
        })
        .collect()
}

/// Render the caption for one photo.
///
/// Returns an empty string when no face survives filtering.
pub fn compose<G: GroupLookup + ?Sized>(
    faces: &[DetectedFace],
    config: &CaptionConfig,
    groups: &G,
) -> String {
    if config.is_football_team {
        return compose_team(faces, config, groups);
    }
    compose_with(faces, config, groups, &Connectives::standard(config.use_title_case))
}

/// Single-row caption with caller-supplied connectives.
pub fn compose_with<G: GroupLookup + ?Sized>(
    faces: &[DetectedFace],
    config: &CaptionConfig,
    groups: &G,
    connectives: &Connectives,
) -> String {
    render(&persons(faces, config, groups), connectives)
}

fn render(names: &[String], connectives: &Connectives) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [head @ .., tail] => format!(
            "{}{}{}{}",
            connectives.start,
            head.join(" "),
            connectives.last,
            tail
        ),
    }
}

/// Split a team photo into (standing, crouching) rows.
///
/// The split line is halfway between the y of the shortest face and the y
/// of the tallest face (first found on ties). Faces exactly on the line fall
/// in neither row.
pub fn split_rows(faces: &[DetectedFace]) -> (Vec<DetectedFace>, Vec<DetectedFace>) {
    let Some(first) = faces.first() else {
        return (Vec::new(), Vec::new());
    };

    let mut shortest = first;
    let mut tallest = first;
    for face in &faces[1..] {
        if face.bbox.height < shortest.bbox.height {
            shortest = face;
        }
        if face.bbox.height > tallest.bbox.height {
            tallest = face;
        }
    }

    let min_y = shortest.bbox.y;
    let max_y = tallest.bbox.y;
    let middle_y = min_y + (max_y - min_y) / 2.0;

    let standing = faces.iter().filter(|f| f.bbox.y < middle_y).cloned().collect();
    let crouching = faces.iter().filter(|f| f.bbox.y > middle_y).cloned().collect();
    (standing, crouching)
}

fn compose_team<G: GroupLookup + ?Sized>(
    faces: &[DetectedFace],
    config: &CaptionConfig,
    groups: &G,
) -> String {
    let (standing, crouching) = split_rows(faces);
    tracing::debug!(
        standing = standing.len(),
        crouching = crouching.len(),
        "team photo rows"
    );

    let title_case = config.use_title_case;
    let upper = compose_with(&standing, config, groups, &Connectives::standing(title_case));
    let lower = compose_with(&crouching, config, groups, &Connectives::crouching(title_case));
    if upper.is_empty() && lower.is_empty() {
        return String::new();
    }
    // A single empty row leaves a leading or trailing space.
    format!("{upper} {lower}")
}
