//! Association between simulator identities and host scene entities.

/// What a scene entity stands for in the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRole {
    Ball,
    /// Zero-based simulator player slot
    Player(usize),
}

const PLAYER_PREFIX: &str = "player-";
const BALL_NAME: &str = "ball";

impl EntityRole {
    /// `"ball"` is the ball, `"player-<N>"` (1-based) is player slot N-1.
    pub fn from_identity(name: &str) -> Option<Self> {
        if name == BALL_NAME {
            return Some(EntityRole::Ball);
        }
        let number: usize = name.strip_prefix(PLAYER_PREFIX)?.parse().ok()?;
        number.checked_sub(1).map(EntityRole::Player)
    }
}

/// Fixed-capacity table of bindings. Holds host handles, never the entities.
#[derive(Debug, Clone)]
pub struct EntityBinder<H> {
    ball: Option<H>,
    players: Vec<Option<H>>,
}

impl<H: Copy + Eq> EntityBinder<H> {
    pub fn new(max_players: usize) -> Self {
        Self {
            ball: None,
            players: vec![None; max_players],
        }
    }

    /// Bind `entity` to `role`, displacing whatever held that role. Returns false
    /// when the player slot is beyond capacity.
    pub fn bind(&mut self, entity: H, role: EntityRole) -> bool {
        match role {
            EntityRole::Ball => {
                self.ball = Some(entity);
                true
            }
            EntityRole::Player(index) => match self.players.get_mut(index) {
                Some(slot) => {
                    *slot = Some(entity);
                    true
                }
                None => false,
            },
        }
    }

    /// Remove every binding that refers to `entity`, returning the role it held.
    pub fn unbind(&mut self, entity: H) -> Option<EntityRole> {
        let mut role = None;
        if self.ball == Some(entity) {
            self.ball = None;
            role = Some(EntityRole::Ball);
        }
        for (index, slot) in self.players.iter_mut().enumerate() {
            if *slot == Some(entity) {
                *slot = None;
                role = Some(EntityRole::Player(index));
            }
        }
        role
    }

    pub fn role_of(&self, entity: H) -> Option<EntityRole> {
        if self.ball == Some(entity) {
            return Some(EntityRole::Ball);
        }
        self.players
            .iter()
            .position(|slot| *slot == Some(entity))
            .map(EntityRole::Player)
    }

    pub fn ball(&self) -> Option<H> {
        self.ball
    }

    pub fn player(&self, index: usize) -> Option<H> {
        self.players.get(index).copied().flatten()
    }

    pub fn players(&self) -> impl Iterator<Item = (usize, H)> + '_ {
        self.players
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|h| (index, h)))
    }

    /// True while the snapshot reports entities that have no binding yet.
    pub fn has_unbound(&self, player_count: usize, ball_present: bool) -> bool {
        if ball_present && self.ball.is_none() {
            return true;
        }
        self.players
            .iter()
            .take(player_count)
            .any(|slot| slot.is_none())
    }

    /// Bind candidates that fill empty slots. Already bound entities and occupied
    /// slots are left alone. Returns the bindings that were made.
    pub fn discover<I>(
        &mut self,
        candidates: I,
        player_count: usize,
        ball_present: bool,
    ) -> Vec<(H, EntityRole)>
    where
        I: IntoIterator<Item = (H, String)>,
    {
        let mut bound = Vec::new();
        for (entity, name) in candidates {
            let Some(role) = EntityRole::from_identity(&name) else {
                continue;
            };
            if self.role_of(entity).is_some() {
                continue;
            }
            let free = match role {
                EntityRole::Ball => ball_present && self.ball.is_none(),
                EntityRole::Player(index) => {
                    index < player_count && matches!(self.players.get(index), Some(None))
                }
            };
            if free && self.bind(entity, role) {
                bound.push((entity, role));
            }
        }
        bound
    }
}
