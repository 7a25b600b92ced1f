//! TMDB v3 response types and their mapping onto source types.
//!
//! Only the fields the tracker stores are deserialized; TMDB sends `null`
//! freely, so nearly everything is optional here and defaulted on conversion.

use serde::{Deserialize, Serialize};
use shared::models::Episode;
use shared::source::{SourceMovie, SourceSeason, SourceSeasonSummary, SourceShow};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub id: u32,
    pub name: String,
}

/// `GET /tv/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvDetails {
    pub id: i64,
    pub name: String,
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub status: Option<String>,
    pub tagline: Option<String>,
    #[serde(default)]
    pub number_of_seasons: Option<u32>,
    #[serde(default)]
    pub number_of_episodes: Option<u32>,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub seasons: Vec<TvSeasonSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvSeasonSummary {
    pub season_number: u32,
    pub name: Option<String>,
    pub overview: Option<String>,
    #[serde(default)]
    pub episode_count: Option<u32>,
    pub air_date: Option<String>,
}

/// `GET /tv/{id}/season/{n}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvSeasonDetails {
    pub season_number: u32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub air_date: Option<String>,
    #[serde(default)]
    pub episodes: Vec<TvEpisode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvEpisode {
    pub episode_number: u32,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub runtime: Option<u32>,
}

/// `GET /movie/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub runtime: Option<u32>,
}

/// Error body TMDB returns alongside non-success statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status_code: Option<i32>,
    pub status_message: Option<String>,
}

fn genre_names(genres: Vec<Genre>) -> Vec<String> {
    genres.into_iter().map(|g| g.name).collect()
}

impl From<TvDetails> for SourceShow {
    fn from(tv: TvDetails) -> Self {
        SourceShow {
            show_id: tv.id,
            name: tv.name,
            overview: tv.overview.unwrap_or_default(),
            genres: genre_names(tv.genres),
            status: tv.status.unwrap_or_default(),
            tagline: tv.tagline.unwrap_or_default(),
            number_of_seasons: tv.number_of_seasons.unwrap_or(0),
            number_of_episodes: tv.number_of_episodes.unwrap_or(0),
            poster_path: tv.poster_path,
            seasons: tv.seasons.into_iter().map(SourceSeasonSummary::from).collect(),
        }
    }
}

impl From<TvSeasonSummary> for SourceSeasonSummary {
    fn from(season: TvSeasonSummary) -> Self {
        SourceSeasonSummary {
            season_number: season.season_number,
            name: season
                .name
                .unwrap_or_else(|| format!("Season {}", season.season_number)),
            overview: season.overview.unwrap_or_default(),
            episode_count: season.episode_count.unwrap_or(0),
            air_date: season.air_date.unwrap_or_default(),
        }
    }
}

impl From<TvSeasonDetails> for SourceSeason {
    fn from(season: TvSeasonDetails) -> Self {
        SourceSeason {
            season_number: season.season_number,
            name: season
                .name
                .unwrap_or_else(|| format!("Season {}", season.season_number)),
            overview: season.overview.unwrap_or_default(),
            air_date: season.air_date.unwrap_or_default(),
            episodes: season
                .episodes
                .into_iter()
                .map(|e| Episode {
                    name: e
                        .name
                        .unwrap_or_else(|| format!("Episode {}", e.episode_number)),
                    episode_number: e.episode_number,
                    overview: e.overview.unwrap_or_default(),
                    runtime: e.runtime.unwrap_or(0),
                })
                .collect(),
        }
    }
}

impl From<MovieDetails> for SourceMovie {
    fn from(movie: MovieDetails) -> Self {
        SourceMovie {
            movie_id: movie.id,
            title: movie.title,
            overview: movie.overview.unwrap_or_default(),
            genres: genre_names(movie.genres),
            release_date: movie.release_date.unwrap_or_default(),
            poster_path: movie.poster_path,
            runtime: movie.runtime.unwrap_or(0),
        }
    }
}
