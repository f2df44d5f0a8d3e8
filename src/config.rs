//! Application configuration, loaded from the environment.

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub bind_port: u16,

    /// Admission validation.
    pub max_question_len: usize,
    pub min_participants: usize,
    pub max_participants: usize,
    pub default_response_timeout_secs: u64,
    pub default_debate_rounds: u32,
    pub min_debate_rounds: u32,
    pub max_debate_rounds: u32,

    /// Vote weighting.
    pub user_vote_weight: f64,
    pub mystery_judge_vote_weight: f64,
    pub model_vote_weight: f64,

    /// Rating engine K-factors.
    pub k_provisional: f64,
    pub k_elite: f64,
    pub k_standard: f64,
    pub provisional_games_threshold: u32,
    pub elite_rating_threshold: i64,
    pub initial_rating: i64,

    /// Provider pool lifecycle.
    pub provider_idle_evict_secs: u64,
    pub provider_start_timeout_secs: u64,

    /// Event Hub backpressure.
    pub subscriber_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./council.db".to_string());

        let bind_port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let max_question_len = std::env::var("MAX_QUESTION_LEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8_000);

        let min_participants = 2;
        let max_participants = 8;

        let default_response_timeout_secs = std::env::var("DEFAULT_RESPONSE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let default_debate_rounds = std::env::var("DEFAULT_DEBATE_ROUNDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let user_vote_weight = std::env::var("USER_VOTE_WEIGHT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.5);

        let provider_idle_evict_secs = std::env::var("PROVIDER_IDLE_EVICT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30 * 60);

        let provider_start_timeout_secs = std::env::var("PROVIDER_START_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let subscriber_buffer_size = std::env::var("SUBSCRIBER_BUFFER_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        Ok(Self {
            database_path,
            bind_port,
            max_question_len,
            min_participants,
            max_participants,
            default_response_timeout_secs,
            default_debate_rounds,
            min_debate_rounds: 1,
            max_debate_rounds: 10,
            user_vote_weight,
            mystery_judge_vote_weight: 1.5,
            model_vote_weight: 1.0,
            k_provisional: 25.0,
            k_elite: 10.0,
            k_standard: 15.0,
            provisional_games_threshold: 30,
            elite_rating_threshold: 2000,
            initial_rating: 1500,
            provider_idle_evict_secs,
            provider_start_timeout_secs,
            subscriber_buffer_size,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            bind_port: 8080,
            max_question_len: 8_000,
            min_participants: 2,
            max_participants: 8,
            default_response_timeout_secs: 60,
            default_debate_rounds: 3,
            min_debate_rounds: 1,
            max_debate_rounds: 10,
            user_vote_weight: 0.5,
            mystery_judge_vote_weight: 1.5,
            model_vote_weight: 1.0,
            k_provisional: 25.0,
            k_elite: 10.0,
            k_standard: 15.0,
            provisional_games_threshold: 30,
            elite_rating_threshold: 2000,
            initial_rating: 1500,
            provider_idle_evict_secs: 30 * 60,
            provider_start_timeout_secs: 30,
            subscriber_buffer_size: 256,
        }
    }
}
