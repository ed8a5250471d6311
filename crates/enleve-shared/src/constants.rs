/// Application name
pub const APP_NAME: &str = "ENLEVE CRM";

/// Record collections on the hosted backend
pub const TABLE_ATTENDANCE: &str = "atendimento";
pub const TABLE_PROFILES: &str = "profiles";
pub const TABLE_USER_ROLES: &str = "user_roles";
pub const TABLE_PREFERENCES: &str = "preferenciacliente";
pub const TABLE_CHAT_HISTORIES: &str = "n8n_chat_histories";

/// Remote procedure that moves a broker to the back of the queue
pub const ROTATE_QUEUE_RPC: &str = "rotacionar_fila";

/// Edge function that issues invitations
pub const INVITE_FUNCTION: &str = "invite-user";

/// Object storage bucket holding profile pictures
pub const AVATAR_BUCKET: &str = "avatars";

/// Lifetime of a signed avatar URL (1 hour)
pub const SIGNED_URL_TTL_SECS: i64 = 3600;

/// Maximum avatar upload size in bytes (5 MiB)
pub const MAX_AVATAR_SIZE: usize = 5 * 1024 * 1024;

/// Accepted avatar MIME types
pub const ALLOWED_AVATAR_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Display name length bounds (characters, after trimming)
pub const DISPLAY_NAME_MIN: usize = 2;
pub const DISPLAY_NAME_MAX: usize = 100;

/// Password length bounds for new accounts
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 72;

/// Maximum invitation email length
pub const EMAIL_MAX: usize = 255;

/// Queue position that holds the next turn
pub const NEXT_TURN_POSITION: i32 = 1;

/// Number of preference rows sampled by the dashboard
pub const PREFERENCE_SAMPLE: usize = 20;

/// Number of preferences shown on the dashboard
pub const TOP_PREFERENCES: usize = 8;
