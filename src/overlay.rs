//! Scoreboard graphics burned into each clip while it is re-encoded.
//!
//! The layout is computed from the output resolution: a dark bar across the
//! bottom 15% of the frame with an orange accent line, a red score box for
//! the first team left of center and a blue one for the second team right
//! of it, team names outside the boxes. Optionally a progression bar on the
//! left marks who scored in every clip so far.

use std::path::{Path, PathBuf};

use crate::manifest::{Manifest, ScoreState};
use crate::media::Resolution;

pub const DEFAULT_TEAM1: &str = "Home";
pub const DEFAULT_TEAM2: &str = "Away";

/// How the scoreboard is drawn for a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreboardOptions {
    pub font: PathBuf,
    /// Draw the per-clip progression bar.
    pub progression: bool,
}

impl Default for ScoreboardOptions {
    fn default() -> Self {
        Self {
            font: default_font(),
            progression: false,
        }
    }
}

/// A bold sans font that is normally present on the current platform.
pub fn default_font() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from("C:/Windows/Fonts/arial.ttf")
    } else if cfg!(target_os = "macos") {
        PathBuf::from("/System/Library/Fonts/Helvetica.ttc")
    } else {
        PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf")
    }
}

/// Which team's score went up in a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Nobody,
    Team1,
    Team2,
}

/// Everything needed to draw the scoreboard onto one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Scoreboard {
    pub team1: String,
    pub team2: String,
    pub score: ScoreState,
    /// Index of this clip within its manifest.
    pub position: usize,
    /// Winner of every clip of the manifest, in clip order.
    pub winners: Vec<Winner>,
}

/// One scoreboard per clip of `manifest`. Clips without a score state count
/// as 0:0.
pub fn scoreboards(manifest: &Manifest) -> Vec<Scoreboard> {
    let team1 = manifest.team1.as_deref().unwrap_or(DEFAULT_TEAM1);
    let team2 = manifest.team2.as_deref().unwrap_or(DEFAULT_TEAM2);
    let scores: Vec<ScoreState> = manifest
        .clips
        .iter()
        .map(|clip| clip.score_state.unwrap_or_default())
        .collect();
    let winners = winners(&scores);

    scores
        .iter()
        .enumerate()
        .map(|(position, score)| Scoreboard {
            team1: team1.to_string(),
            team2: team2.to_string(),
            score: *score,
            position,
            winners: winners.clone(),
        })
        .collect()
}

/// A clip is won by the team whose score rose above the highest value seen
/// for it so far. Team 1 is checked first.
pub fn winners(scores: &[ScoreState]) -> Vec<Winner> {
    let (mut best1, mut best2) = (0, 0);

    scores
        .iter()
        .map(|score| {
            if score.t1 > best1 {
                best1 = score.t1;
                Winner::Team1
            } else if score.t2 > best2 {
                best2 = score.t2;
                Winner::Team2
            } else {
                Winner::Nobody
            }
        })
        .collect()
}

/// drawtext treats `:` as an option separator and the text sits in single
/// quotes.
fn escape_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\'' | '\\' | '%'))
        .collect::<String>()
        .replace(':', "\\:")
}

fn escape_font(font: &Path) -> String {
    font.to_string_lossy().replace('\\', "/").replace(':', "\\:").replace('\'', "")
}

/// The drawbox/drawtext filters for `board` on a frame of `resolution`.
pub fn filters(board: &Scoreboard, resolution: Resolution, options: &ScoreboardOptions) -> Vec<String> {
    let w = resolution.width as i64;
    let h = resolution.height as i64;
    let hf = h as f64;

    let bar_height = (hf * 0.15) as i64;
    let bar_y = h - bar_height;
    let accent_height = ((hf * 0.006) as i64).max(2);

    let box_height = (bar_height as f64 * 0.5) as i64;
    let box_width = (box_height as f64 * 1.2) as i64;
    let box_y = bar_y + (bar_height - box_height) / 2;

    let center_x = w / 2;
    let box1_x = center_x - box_width;
    let box2_x = center_x;

    let font_score = (box_height as f64 * 0.8) as i64;
    let font_team = (bar_height as f64 * 0.25) as i64;
    let name_offset = (box_width as f64 * 0.2) as i64;

    let font = escape_font(&options.font);
    let text_y = format!("{box_y}+(({box_height}-text_h)/2)");
    let drawtext = |text: &str, size: i64, x: String| {
        format!(
            "drawtext=fontfile='{font}':text='{text}':fontcolor=white:fontsize={size}:x={x}:y={text_y}",
            text = escape_text(text)
        )
    };

    let mut filters = Vec::new();

    if options.progression {
        filters.extend(progression(board, h, bar_height));
    }

    filters.push(format!("drawbox=y={bar_y}:h={bar_height}:w={w}:color=black@0.8:t=fill"));
    filters.push(format!("drawbox=y={bar_y}:h={accent_height}:w={w}:color=orange@1:t=fill"));
    filters.push(format!(
        "drawbox=x={box1_x}:y={box_y}:w={box_width}:h={box_height}:color=red@0.8:t=fill"
    ));
    filters.push(format!(
        "drawbox=x={box2_x}:y={box_y}:w={box_width}:h={box_height}:color=blue@0.8:t=fill"
    ));

    filters.push(drawtext(&board.team1, font_team, format!("{}-text_w", box1_x - name_offset)));
    filters.push(drawtext(
        &board.score.t1.to_string(),
        font_score,
        format!("{box1_x}+(({box_width}-text_w)/2)"),
    ));
    filters.push(drawtext(
        &board.score.t2.to_string(),
        font_score,
        format!("{box2_x}+(({box_width}-text_w)/2)"),
    ));
    filters.push(drawtext(&board.team2, font_team, (box2_x + box_width + name_offset).to_string()));

    filters
}

/// Vertical line with one square per scoring clip up to `board.position`:
/// red left of the line for team 1, blue right of it for team 2.
fn progression(board: &Scoreboard, h: i64, bar_height: i64) -> Vec<String> {
    let hf = h as f64;
    let total = board.winners.len().max(1) as f64;

    let margin_top = (hf * 0.05) as i64;
    let available = h - margin_top - bar_height - (hf * 0.02) as i64;
    let line_x = (hf * 0.05) as i64 + 14;
    let line_w = ((hf * 0.003) as i64).max(2);

    let slot = (available as f64 / total).min(hf * 0.05);
    let gap = ((slot * 0.1) as i64).max(1);
    let square = slot - gap as f64;

    let mut filters = vec![format!(
        "drawbox=x={line_x}:y={margin_top}:w={line_w}:h={available}:color=white@1:t=fill"
    )];

    for (k, winner) in board.winners.iter().enumerate().take(board.position + 1) {
        let (x, color) = match winner {
            Winner::Nobody => continue,
            Winner::Team1 => ((line_x as f64 - gap as f64 - square) as i64, "red@0.8"),
            Winner::Team2 => (line_x + line_w + gap, "blue@0.8"),
        };
        let y = (margin_top as f64 + k as f64 * slot) as i64;
        filters.push(format!(
            "drawbox=x={x}:y={y}:w={size}:h={size}:color={color}:t=fill",
            size = square as i64
        ));
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Clip;

    fn score(t1: u32, t2: u32) -> ScoreState {
        ScoreState { t1, t2 }
    }

    fn board(position: usize, winners: Vec<Winner>) -> Scoreboard {
        Scoreboard {
            team1: "Reds".to_string(),
            team2: "Blues".to_string(),
            score: score(2, 1),
            position,
            winners,
        }
    }

    fn options(progression: bool) -> ScoreboardOptions {
        ScoreboardOptions {
            font: PathBuf::from("/fonts/bold.ttf"),
            progression,
        }
    }

    #[test]
    fn winner_is_the_team_whose_score_rose() {
        let scores = [score(0, 0), score(1, 0), score(1, 1), score(1, 1), score(2, 1)];
        assert_eq!(
            winners(&scores),
            vec![
                Winner::Nobody,
                Winner::Team1,
                Winner::Team2,
                Winner::Nobody,
                Winner::Team1
            ]
        );
    }

    #[test]
    fn scoreboards_default_team_names_and_missing_scores() {
        let manifest = Manifest {
            source_video_id: "abc".to_string(),
            title: None,
            team1: Some("Reds".to_string()),
            team2: None,
            clips: vec![Clip::new(0.0, 1.0), Clip::new(2.0, 3.0).with_score(0, 1)],
        };
        let boards = scoreboards(&manifest);

        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].team1, "Reds");
        assert_eq!(boards[0].team2, DEFAULT_TEAM2);
        assert_eq!(boards[0].score, ScoreState::default());
        assert_eq!(boards[1].position, 1);
        assert_eq!(boards[1].winners, vec![Winner::Nobody, Winner::Team2]);
    }

    #[test]
    fn layout_scales_with_resolution() {
        let filters = filters(&board(0, vec![Winner::Team1]), Resolution::new(1920, 1080), &options(false));

        assert_eq!(filters.len(), 8);
        assert_eq!(filters[0], "drawbox=y=918:h=162:w=1920:color=black@0.8:t=fill");
        assert_eq!(filters[1], "drawbox=y=918:h=6:w=1920:color=orange@1:t=fill");
        assert_eq!(filters[2], "drawbox=x=863:y=958:w=97:h=81:color=red@0.8:t=fill");
        assert_eq!(filters[3], "drawbox=x=960:y=958:w=97:h=81:color=blue@0.8:t=fill");
        assert!(filters[4].contains("text='Reds'"));
        assert!(filters[4].contains("x=844-text_w"));
        assert!(filters[5].contains("text='2'"));
        assert!(filters[5].contains("fontsize=64"));
        assert!(filters[6].contains("text='1'"));
        assert!(filters[7].contains("text='Blues'"));
        assert!(filters[7].contains("fontsize=40"));

        let small = filters_for_720();
        assert_eq!(small[0], "drawbox=y=612:h=108:w=1280:color=black@0.8:t=fill");
    }

    fn filters_for_720() -> Vec<String> {
        filters(&board(0, vec![Winner::Nobody]), Resolution::new(1280, 720), &options(false))
    }

    #[test]
    fn progression_marks_scoring_clips_so_far() {
        let winners = vec![Winner::Nobody, Winner::Team1, Winner::Team2, Winner::Team1];

        let at_third = filters(&board(2, winners.clone()), Resolution::new(1920, 1080), &options(true));
        // Line, two squares, then the eight scoreboard filters.
        assert_eq!(at_third.len(), 11);
        assert!(at_third[0].contains("color=white@1"));
        assert!(at_third[1].contains("color=red@0.8"));
        assert!(at_third[2].contains("color=blue@0.8"));

        let at_last = filters(&board(3, winners), Resolution::new(1920, 1080), &options(true));
        assert_eq!(at_last.len(), 12);
    }

    #[test]
    fn text_is_escaped_for_drawtext() {
        assert_eq!(escape_text("Red: Team's 100%"), "Red\\: Teams 100");
        assert_eq!(escape_font(Path::new("C:\\Fonts\\arial.ttf")), "C\\:/Fonts/arial.ttf");
    }
}
