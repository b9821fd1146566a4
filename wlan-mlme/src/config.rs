use tokio::{fs, io::AsyncReadExt};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("read config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config file error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 会话索引是 u16
pub const MAX_SESSIONS: usize = u16::MAX as usize + 1;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dispatcher: Dispatcher,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Dispatcher {
    /// 分发器输入通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// 延迟队列容量
    #[serde(default = "default_deferred_capacity")]
    pub deferred_capacity: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            deferred_capacity: default_deferred_capacity(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Session {
    /// 会话表容量
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// AP 会话最多接纳的对端数
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// 连续多少个心跳周期没有信标判定链路丢失
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat_threshold: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_peers: default_max_peers(),
            heartbeat_threshold: default_heartbeat_threshold(),
        }
    }
}

/// 各类等待的超时时间，单位毫秒
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub join: u64,
    pub auth: u64,
    pub assoc: u64,
    pub reassoc: u64,
    pub add_bss: u64,
    pub add_sta: u64,
    pub delete_sta: u64,
    pub delete_bss: u64,
    pub set_key: u64,
    pub switch_channel: u64,
    pub heartbeat: u64,
    pub add_ts: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            join: 3000,
            auth: 1000,
            assoc: 1000,
            reassoc: 1000,
            add_bss: 2000,
            add_sta: 2000,
            delete_sta: 2000,
            delete_bss: 2000,
            set_key: 2000,
            switch_channel: 2000,
            heartbeat: 1000,
            add_ts: 1000,
        }
    }
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_deferred_capacity() -> usize {
    64
}

fn default_max_sessions() -> usize {
    4
}

fn default_max_peers() -> usize {
    32
}

fn default_heartbeat_threshold() -> u32 {
    3
}

impl Config {
    pub async fn from_path(path: &str) -> Result<Self, Error> {
        let mut file = fs::File::open(path).await?;
        let mut s = String::new();
        file.read_to_string(&mut s).await?;

        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        let cfg = toml::from_str::<Config>(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 容量必须大于 0，会话数不能超过会话索引的范围，超时必须大于 0
    pub fn validate(&self) -> Result<(), Error> {
        if self.dispatcher.channel_capacity == 0 {
            return Err(Error::Invalid("dispatcher.channel_capacity must be positive".into()));
        }
        if self.session.max_sessions == 0 || self.session.max_sessions > MAX_SESSIONS {
            return Err(Error::Invalid(format!(
                "session.max_sessions must be in 1..={}",
                MAX_SESSIONS
            )));
        }
        let t = &self.timeouts;
        for (name, ms) in [
            ("join", t.join),
            ("auth", t.auth),
            ("assoc", t.assoc),
            ("reassoc", t.reassoc),
            ("add_bss", t.add_bss),
            ("add_sta", t.add_sta),
            ("delete_sta", t.delete_sta),
            ("delete_bss", t.delete_bss),
            ("set_key", t.set_key),
            ("switch_channel", t.switch_channel),
            ("heartbeat", t.heartbeat),
            ("add_ts", t.add_ts),
        ] {
            if ms == 0 {
                return Err(Error::Invalid(format!("timeouts.{} must be positive", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_uses_defaults() {
        let cfg = Config::parse(
            r#"
            [session]
            max_sessions = 2

            [timeouts]
            assoc = 250
            "#,
        )
        .unwrap();

        assert_eq!(cfg.session.max_sessions, 2);
        assert_eq!(cfg.session.max_peers, 32);
        assert_eq!(cfg.timeouts.assoc, 250);
        assert_eq!(cfg.timeouts.auth, 1000);
        assert_eq!(cfg.dispatcher.deferred_capacity, 64);
    }

    #[test]
    fn empty_file() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.session.heartbeat_threshold, 3);
        assert_eq!(cfg.dispatcher.channel_capacity, 1000);
    }

    #[test]
    fn bad_type_is_reported() {
        assert!(matches!(
            Config::parse("[session]\nmax_sessions = \"four\""),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn zero_values_are_rejected() {
        for s in [
            "[dispatcher]\nchannel_capacity = 0\n",
            "[session]\nmax_sessions = 0\n",
            "[session]\nmax_sessions = 70000\n",
            "[timeouts]\nadd_bss = 0\n",
        ] {
            assert!(
                matches!(Config::parse(s), Err(Error::Invalid(_))),
                "accepted {:?}",
                s
            );
        }
        assert!(Config::default().validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file() {
        assert!(matches!(
            Config::from_path("/nonexistent/mlme.toml").await,
            Err(Error::Io(_))
        ));
    }
}
