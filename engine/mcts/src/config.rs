//! MCTS configuration parameters.

/// Configuration for Monte Carlo Tree Search.
#[derive(Debug, Clone)]
pub struct MctsConfig {
    /// Default number of simulations per search when the caller does not
    /// pass an explicit count.
    pub num_simulations: u32,

    /// Exploration constant for the PUCT formula.
    /// Higher values encourage exploration, lower values favor exploitation.
    pub c_puct: f32,

    /// Dirichlet noise alpha for root node exploration.
    /// Chess has ~30 legal moves per position, AlphaZero used 0.3.
    /// Set to 0.0 to disable noise (evaluation/inference).
    pub dirichlet_alpha: f32,

    /// Fraction of the root prior that comes from Dirichlet noise.
    pub dirichlet_epsilon: f32,

    /// Temperature used for the opening plies of a self-play game.
    /// 1.0 = sample proportional to visit counts, 0.0 = argmax.
    pub temperature: f32,

    /// Ply after which `late_temperature` replaces `temperature` (0 disables).
    pub temp_threshold: u32,

    /// Temperature used once `temp_threshold` plies have been played.
    pub late_temperature: f32,

    /// Keep the inference cache across searches of the same engine.
    pub persist_cache: bool,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            num_simulations: 100,
            c_puct: 1.25,
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.25,
            temperature: 1.0,
            temp_threshold: 15,
            late_temperature: 0.0,
            persist_cache: false,
        }
    }
}

impl MctsConfig {
    /// Create config for self-play (with exploration noise).
    pub fn for_training() -> Self {
        Self::default()
    }

    /// Create config for evaluation matches (no noise, greedy selection).
    pub fn for_evaluation() -> Self {
        Self {
            dirichlet_alpha: 0.0,
            dirichlet_epsilon: 0.0,
            temperature: 0.0,
            temp_threshold: 0,
            ..Self::default()
        }
    }

    /// Create a fast, deterministic config for testing.
    pub fn for_testing() -> Self {
        Self {
            num_simulations: 20,
            dirichlet_alpha: 0.0,
            dirichlet_epsilon: 0.0,
            temperature: 0.0,
            temp_threshold: 0,
            ..Self::default()
        }
    }

    /// Builder pattern: set number of simulations.
    pub fn with_simulations(mut self, n: u32) -> Self {
        self.num_simulations = n;
        self
    }

    /// Builder pattern: set c_puct exploration constant.
    pub fn with_c_puct(mut self, c: f32) -> Self {
        self.c_puct = c;
        self
    }

    /// Builder pattern: set temperature.
    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    /// Builder pattern: set the late-game temperature schedule.
    pub fn with_temp_schedule(mut self, threshold: u32, late_temperature: f32) -> Self {
        self.temp_threshold = threshold;
        self.late_temperature = late_temperature;
        self
    }

    /// Builder pattern: set root Dirichlet noise.
    pub fn with_dirichlet(mut self, alpha: f32, epsilon: f32) -> Self {
        self.dirichlet_alpha = alpha;
        self.dirichlet_epsilon = epsilon;
        self
    }

    /// Builder pattern: keep cached predictions across searches.
    pub fn with_persistent_cache(mut self, persist: bool) -> Self {
        self.persist_cache = persist;
        self
    }

    /// Temperature to use at `ply` (0-based) under the configured schedule.
    pub fn temperature_at(&self, ply: u32) -> f32 {
        if self.temp_threshold > 0 && ply >= self.temp_threshold {
            self.late_temperature
        } else {
            self.temperature
        }
    }

    #[inline]
    pub(crate) fn noise_enabled(&self) -> bool {
        self.dirichlet_alpha > 0.0 && self.dirichlet_epsilon > 0.0
    }
}
