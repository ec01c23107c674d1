//! Team names show up on the venue leaderboard screens, so they get a light
//! profanity pass before a game is created.

pub const MAX_TEAM_NAME_CHARS: usize = 32;

const BLOCKED: &[&str] = &[
  "arse", "asshole", "bastard", "bitch", "bollocks", "cock", "crap", "cunt", "damn",
  "dick", "fuck", "fucker", "motherfucker", "piss", "prick", "shit", "slut", "twat", "wanker", "whore",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeamNameError {
  #[error("team name is empty")]
  Empty,
  #[error("team name is longer than {MAX_TEAM_NAME_CHARS} characters")]
  TooLong,
  #[error("team name contains a blocked word")]
  Profane,
}

fn unleet(ch: char) -> char {
  match ch {
    '0' => 'o',
    '1' | '!' => 'i',
    '3' => 'e',
    '4' | '@' => 'a',
    '5' | '$' => 's',
    '7' => 't',
    other => other,
  }
}

/// Word-level match so names like "Scunthorpe Squad" pass.
pub fn contains_profanity(name: &str) -> bool {
  let normalized: String = name.chars().map(|c| unleet(c.to_ascii_lowercase())).collect();
  normalized
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| !w.is_empty())
    .any(|word| {
      let singular = word.strip_suffix('s').unwrap_or(word);
      BLOCKED.contains(&word) || BLOCKED.contains(&singular)
    })
}

/// Returns the trimmed name when it is acceptable.
pub fn validate_team_name(name: &str) -> Result<String, TeamNameError> {
  let trimmed = name.trim();
  if trimmed.is_empty() { return Err(TeamNameError::Empty); }
  if trimmed.chars().count() > MAX_TEAM_NAME_CHARS { return Err(TeamNameError::TooLong); }
  if contains_profanity(trimmed) { return Err(TeamNameError::Profane); }
  Ok(trimmed.to_string())
}
