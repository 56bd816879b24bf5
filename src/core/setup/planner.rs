// ─── Server Setup Planner ───
// Turns wizard choices into file-transaction batches: back up settings from
// an old server, clear the new directory, restore the backups, and fetch the
// server jar into the shared cache. Also writes the small files a finished
// server needs (accepted EULA, launch script).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::options::SetupOptions;
use crate::core::error::{SetupError, SetupResult};
use crate::core::progress::ProgressHandle;
use crate::core::state::EngineSettings;
use crate::core::transactions::TransactionScheduler;

const BACKUP_SUFFIX: &str = ".back";
const SERVER_PROPERTIES: &str = "server.properties";
const LAUNCH_SCRIPT: &str = "LaunchServer.bat";
const EULA_FILE: &str = "eula.txt";
const SERVER_JAR_PREFIX: &str = "minecraft_server";

/// Heap flags the launch script passes to the JVM.
const JVM_MEMORY_ARGS: &str = "-Xmx1024M -Xms1024M";

/// Settings files carried over from a previous server, grouped by option.
const PROPERTIES_FILES: &[&str] = &[SERVER_PROPERTIES];
const WHITELIST_FILES: &[&str] = &["whitelist.json"];
const BANLIST_FILES: &[&str] = &["banned-ips.json", "banned-players.json"];
const USERCACHE_FILES: &[&str] = &["usercache.json"];
const OPERATOR_FILES: &[&str] = &["ops.json"];

pub struct ServerSetup {
    options: SetupOptions,
    root: PathBuf,
    settings: EngineSettings,
    transactions: TransactionScheduler,
}

impl ServerSetup {
    /// Plan a setup rooted at `root`; the server lives in `root/<server_name>`.
    pub fn new(
        options: SetupOptions,
        root: impl Into<PathBuf>,
        settings: EngineSettings,
    ) -> SetupResult<Self> {
        options.validate_server_name()?;
        let transactions = TransactionScheduler::new(&settings)?;
        Ok(Self {
            options,
            root: root.into(),
            settings,
            transactions,
        })
    }

    pub fn options(&self) -> &SetupOptions {
        &self.options
    }

    pub fn transactions(&self) -> &TransactionScheduler {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut TransactionScheduler {
        &mut self.transactions
    }

    pub fn server_dir(&self) -> PathBuf {
        self.root.join(&self.options.server_name)
    }

    pub fn shared_dir(&self) -> PathBuf {
        if self.settings.shared_dir.is_absolute() {
            self.settings.shared_dir.clone()
        } else {
            self.root.join(&self.settings.shared_dir)
        }
    }

    pub fn server_jar_path(&self) -> PathBuf {
        self.shared_dir().join(self.options.server_jar_name())
    }

    /// Create the server directory and schedule backups of everything the
    /// options ask to carry over.
    pub async fn start_setup(&mut self) -> SetupResult<()> {
        let server_dir = self.server_dir();
        tokio::fs::create_dir_all(&server_dir)
            .await
            .map_err(|source| SetupError::Io {
                path: server_dir.clone(),
                source,
            })?;
        info!("Preparing server '{}' in {:?}", self.options.server_name, server_dir);
        self.schedule_backups();
        Ok(())
    }

    pub fn begin_file_transactions(&mut self) -> SetupResult<ProgressHandle> {
        self.transactions.begin()
    }

    // ── Scheduling ──────────────────────────────────────

    pub fn schedule_backups(&mut self) {
        let groups = [
            (self.options.server_properties_source.clone(), PROPERTIES_FILES),
            (self.options.whitelist_source.clone(), WHITELIST_FILES),
            (self.options.banlist_source.clone(), BANLIST_FILES),
            (self.options.usercache_source.clone(), USERCACHE_FILES),
            (self.options.operators_source.clone(), OPERATOR_FILES),
        ];

        for (source_dir, files) in groups {
            let Some(source_dir) = source_dir else { continue };
            for file in files {
                self.schedule_file_backup(&source_dir.join(file));
            }
        }

        if let Some(map_source) = self.options.map_data_source.clone() {
            let level = map_source.join(self.options.level_name());
            let dest = self.server_dir().join(&self.options.server_name);
            self.schedule_directory_backup(&level, &dest);
        }
    }

    /// Delete everything in the server directory except `*.back` entries.
    pub async fn schedule_cleanup_directory(&mut self) -> SetupResult<()> {
        for (path, name) in self.list_server_dir().await? {
            if !name.ends_with(BACKUP_SUFFIX) {
                self.transactions.schedule_delete(path, false);
            }
        }
        Ok(())
    }

    /// Move every `*.back` entry back to its original name, replacing
    /// whatever currently sits there.
    pub async fn schedule_restore_backups(&mut self) -> SetupResult<()> {
        for (path, name) in self.list_server_dir().await? {
            let Some(original) = name.strip_suffix(BACKUP_SUFFIX) else {
                continue;
            };
            let target = path.with_file_name(original);
            if target.exists() {
                self.transactions.schedule_delete(&target, false);
            }
            self.transactions.schedule_move(path, target, false);
        }
        Ok(())
    }

    /// Schedule the server jar download unless it is already cached.
    ///
    /// Returns whether a download was scheduled.
    pub async fn schedule_download_server_jar(&mut self) -> SetupResult<bool> {
        let shared = self.shared_dir();
        let jar_path = self.server_jar_path();
        if jar_path.exists() {
            debug!("Server jar already cached at {:?}", jar_path);
            return Ok(false);
        }
        tokio::fs::create_dir_all(&shared)
            .await
            .map_err(|source| SetupError::Io {
                path: shared.clone(),
                source,
            })?;

        let version = &self.options.server_version;
        let url = format!(
            "{}/{}.{}/{}",
            self.settings.download_base_url.trim_end_matches('/'),
            version.major(),
            version.minor(),
            self.options.server_jar_name()
        );
        self.transactions.schedule_download(url, jar_path);
        Ok(true)
    }

    // ── Finishing touches ───────────────────────────────

    /// Flip `eula=false` to `true` in the server's `eula.txt`.
    ///
    /// Servers before 1.8 have no EULA and are left alone. Returns `false`
    /// when a 1.8+ server has not written its `eula.txt` yet.
    pub async fn agree_to_eula(&self) -> SetupResult<bool> {
        let version = &self.options.server_version;
        if (version.major(), version.minor()) < (1, 8) {
            return Ok(true);
        }

        let eula = self.server_dir().join(EULA_FILE);
        if !eula.exists() {
            debug!("No {} in {:?} yet", EULA_FILE, self.server_dir());
            return Ok(false);
        }
        let io_err = |source: std::io::Error| SetupError::Io {
            path: eula.clone(),
            source,
        };
        let text = tokio::fs::read_to_string(&eula).await.map_err(io_err)?;
        tokio::fs::write(&eula, text.replace("false", "true"))
            .await
            .map_err(io_err)?;
        info!("Accepted EULA for '{}'", self.options.server_name);
        Ok(true)
    }

    /// Write `LaunchServer.bat`, which starts the shared jar from the server
    /// directory.
    pub async fn create_server_launch_script(&self) -> SetupResult<PathBuf> {
        let script = self.server_dir().join(LAUNCH_SCRIPT);
        let jar = self.launch_jar_reference();
        let contents = format!("java {}\npause", server_command_line_args(&jar));
        tokio::fs::write(&script, contents)
            .await
            .map_err(|source| SetupError::Io {
                path: script.clone(),
                source,
            })?;
        info!("Wrote launch script {:?}", script);
        Ok(script)
    }

    /// Jar path as seen from inside the server directory. A relative shared
    /// directory is a sibling of the server, written with `\` for `cmd.exe`.
    fn launch_jar_reference(&self) -> String {
        let jar_name = self.options.server_jar_name();
        if self.settings.shared_dir.is_absolute() {
            return self.server_jar_path().to_string_lossy().into_owned();
        }
        let shared = self.settings.shared_dir.to_string_lossy().replace('/', "\\");
        format!("..\\{shared}\\{jar_name}")
    }

    fn schedule_file_backup(&mut self, source: &Path) {
        let Some(file_name) = source.file_name() else {
            return;
        };
        let dest = self.server_dir().join(with_backup_suffix(file_name));
        if dest.exists() {
            self.transactions.schedule_delete(&dest, false);
        }
        self.transactions.schedule_copy(source, dest, true);
    }

    fn schedule_directory_backup(&mut self, source: &Path, dest_dir: &Path) {
        let Some(dir_name) = dest_dir.file_name() else {
            return;
        };
        let dest = dest_dir.with_file_name(with_backup_suffix(dir_name));
        if dest.exists() {
            self.transactions.schedule_delete(&dest, false);
        }
        self.transactions.schedule_copy(source, dest, true);
    }

    async fn list_server_dir(&self) -> SetupResult<Vec<(PathBuf, String)>> {
        let server_dir = self.server_dir();
        let io_err = |source: std::io::Error| SetupError::Io {
            path: server_dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&server_dir).await.map_err(io_err)?;
        let mut listed = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            listed.push((entry.path(), name));
        }
        listed.sort();
        Ok(listed)
    }
}

fn with_backup_suffix(name: &std::ffi::OsStr) -> OsString {
    let mut name = name.to_os_string();
    name.push(BACKUP_SUFFIX);
    name
}

/// JVM arguments that start `jar` headless with the default heap.
pub fn server_command_line_args(jar: &str) -> String {
    format!("{JVM_MEMORY_ARGS} -jar \"{jar}\" nogui")
}

// ── Discovery ───────────────────────────────────────────

/// Directories under `root` that look like servers set up by this tool.
pub async fn existing_server_instances(root: &Path) -> SetupResult<Vec<PathBuf>> {
    let io_err = |source: std::io::Error| SetupError::Io {
        path: root.to_path_buf(),
        source,
    };

    let launch_script = LAUNCH_SCRIPT.to_lowercase();
    let mut entries = tokio::fs::read_dir(root).await.map_err(io_err)?;
    let mut servers = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let names = lowercase_file_names(&dir).await;
        if names.iter().any(|n| n == SERVER_PROPERTIES) && names.contains(&launch_script) {
            servers.push(dir);
        }
    }
    servers.sort();
    Ok(servers)
}

/// Whether `root/<name>` holds a `server.properties`.
pub async fn server_exists(root: &Path, name: &str) -> bool {
    let dir = root.join(name);
    dir.is_dir()
        && lowercase_file_names(&dir)
            .await
            .iter()
            .any(|n| n.ends_with(SERVER_PROPERTIES))
}

/// The `minecraft_server*.jar` inside server `root/<name>`, if one was copied there.
pub async fn server_jar(root: &Path, name: &str) -> SetupResult<Option<PathBuf>> {
    let dir = root.join(name);
    if !dir.is_dir() {
        return Err(SetupError::ServerNotFound(dir));
    }
    let jar = file_names(&dir).await.into_iter().find(|n| {
        let n = n.to_lowercase();
        n.starts_with(SERVER_JAR_PREFIX) && n.ends_with(".jar")
    });
    Ok(jar.map(|n| dir.join(n)))
}

async fn lowercase_file_names(dir: &Path) -> Vec<String> {
    file_names(dir)
        .await
        .into_iter()
        .map(|n| n.to_lowercase())
        .collect()
}

/// Names of the regular files directly inside `dir`, sorted. Unreadable
/// directories list as empty.
async fn file_names(dir: &Path) -> Vec<String> {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WAIT: Duration = Duration::from_secs(10);

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn options(name: &str) -> SetupOptions {
        SetupOptions::new(name, "1.8.9".parse().unwrap())
    }

    #[test]
    fn rejects_invalid_server_names() {
        let result = ServerSetup::new(options("bad/name"), ".", EngineSettings::default());
        assert!(matches!(result, Err(SetupError::InvalidServerName(_))));
    }

    #[tokio::test]
    async fn backups_copy_settings_and_map_into_server_dir() {
        let root = tempfile::tempdir().unwrap();
        let old = root.path().join("old");
        write(&old.join("server.properties"), "motd=hi");
        write(&old.join("ops.json"), "[]");
        write(&old.join("banned-ips.json"), "[]");
        // banned-players.json is absent: its optional copy is skipped.
        write(&old.join("survival/level.dat"), "level");
        write(&old.join("survival/region/r.0.0.mca"), "chunks");

        let mut opts = options("Fresh");
        opts.server_properties_source = Some(old.clone());
        opts.operators_source = Some(old.clone());
        opts.banlist_source = Some(old.clone());
        opts.map_data_source = Some(old.clone());
        opts.level_name = Some("survival".into());

        let mut setup = ServerSetup::new(opts, root.path(), EngineSettings::default()).unwrap();
        setup.start_setup().await.unwrap();
        assert_eq!(setup.transactions().len(), 5);

        setup.begin_file_transactions().unwrap().wait_timeout(WAIT).await.unwrap();
        assert!(setup.transactions().errors().is_empty());

        let server = setup.server_dir();
        assert!(server.join("server.properties.back").exists());
        assert!(server.join("ops.json.back").exists());
        assert!(server.join("banned-ips.json.back").exists());
        assert!(!server.join("banned-players.json.back").exists());
        assert!(server.join("Fresh.back/region/r.0.0.mca").exists());
    }

    #[tokio::test]
    async fn cleanup_then_restore_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let mut setup =
            ServerSetup::new(options("Creative"), root.path(), EngineSettings::default()).unwrap();
        let server = setup.server_dir();
        write(&server.join("server.properties"), "generated");
        write(&server.join("server.properties.back"), "restored");
        write(&server.join("logs/latest.log"), "noise");
        write(&server.join("Creative.back/level.dat"), "map");

        setup.schedule_cleanup_directory().await.unwrap();
        setup.begin_file_transactions().unwrap().wait_timeout(WAIT).await.unwrap();
        assert!(!server.join("server.properties").exists());
        assert!(!server.join("logs").exists());

        // The server run regenerates defaults before restore.
        write(&server.join("server.properties"), "generated again");
        setup.schedule_restore_backups().await.unwrap();
        setup.begin_file_transactions().unwrap().wait_timeout(WAIT).await.unwrap();

        assert!(setup.transactions().errors().is_empty());
        assert_eq!(
            std::fs::read_to_string(server.join("server.properties")).unwrap(),
            "restored"
        );
        assert!(server.join("Creative/level.dat").exists());
        assert!(!server.join("Creative.back").exists());
    }

    #[tokio::test]
    async fn server_jar_download_is_skipped_when_cached() {
        let http = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.8/minecraft_server.1.8.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 2048]))
            .mount(&http)
            .await;

        let root = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            download_base_url: http.uri(),
            ..EngineSettings::default()
        };
        let mut setup = ServerSetup::new(options("Jar"), root.path(), settings).unwrap();

        assert!(setup.schedule_download_server_jar().await.unwrap());
        setup.begin_file_transactions().unwrap().wait_timeout(WAIT).await.unwrap();
        assert!(setup.transactions().errors().is_empty());
        assert_eq!(std::fs::metadata(setup.server_jar_path()).unwrap().len(), 2048);

        assert!(!setup.schedule_download_server_jar().await.unwrap());
        assert!(setup.transactions().is_empty());
    }

    #[tokio::test]
    async fn discovers_existing_servers() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("alpha/server.properties"), "");
        write(&root.path().join("alpha/launchserver.BAT"), "");
        write(&root.path().join("beta/server.properties"), "");
        write(&root.path().join("loose.txt"), "");

        let found = existing_server_instances(root.path()).await.unwrap();
        assert_eq!(found, vec![root.path().join("alpha")]);
        assert!(server_exists(root.path(), "beta").await);
        assert!(!server_exists(root.path(), "gamma").await);
    }

    #[tokio::test]
    async fn eula_is_accepted_for_1_8_and_later() {
        let root = tempfile::tempdir().unwrap();
        let setup =
            ServerSetup::new(options("Eula"), root.path(), EngineSettings::default()).unwrap();
        let eula = setup.server_dir().join("eula.txt");

        assert!(!setup.agree_to_eula().await.unwrap());

        write(&eula, "#By changing the setting below to TRUE you agree\neula=false\n");
        assert!(setup.agree_to_eula().await.unwrap());
        assert_eq!(
            std::fs::read_to_string(&eula).unwrap(),
            "#By changing the setting below to TRUE you agree\neula=true\n"
        );
    }

    #[tokio::test]
    async fn eula_is_left_alone_before_1_8() {
        let root = tempfile::tempdir().unwrap();
        let opts = SetupOptions::new("Old", "1.7.10".parse().unwrap());
        let setup = ServerSetup::new(opts, root.path(), EngineSettings::default()).unwrap();
        let eula = setup.server_dir().join("eula.txt");
        write(&eula, "eula=false");

        assert!(setup.agree_to_eula().await.unwrap());
        assert_eq!(std::fs::read_to_string(&eula).unwrap(), "eula=false");
    }

    #[test]
    fn command_line_runs_jar_headless() {
        assert_eq!(
            server_command_line_args("..\\.shared\\minecraft_server.1.8.jar"),
            "-Xmx1024M -Xms1024M -jar \"..\\.shared\\minecraft_server.1.8.jar\" nogui"
        );
    }

    #[tokio::test]
    async fn launch_script_makes_server_discoverable() {
        let root = tempfile::tempdir().unwrap();
        let mut setup =
            ServerSetup::new(options("Survival"), root.path(), EngineSettings::default()).unwrap();
        setup.start_setup().await.unwrap();
        write(&setup.server_dir().join("server.properties"), "motd=hi");
        assert!(existing_server_instances(root.path()).await.unwrap().is_empty());

        let script = setup.create_server_launch_script().await.unwrap();
        assert_eq!(script, setup.server_dir().join("LaunchServer.bat"));
        assert_eq!(
            std::fs::read_to_string(&script).unwrap(),
            "java -Xmx1024M -Xms1024M -jar \"..\\.shared\\minecraft_server.1.8.jar\" nogui\npause"
        );
        assert_eq!(
            existing_server_instances(root.path()).await.unwrap(),
            vec![setup.server_dir()]
        );
    }

    #[tokio::test]
    async fn finds_server_jar_inside_server_dir() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("Legacy/Minecraft_Server.1.7.jar"), "jar");
        write(&root.path().join("Legacy/plugin.jar"), "jar");
        write(&root.path().join("Empty/server.properties"), "");

        assert_eq!(
            server_jar(root.path(), "Legacy").await.unwrap(),
            Some(root.path().join("Legacy/Minecraft_Server.1.7.jar"))
        );
        assert_eq!(server_jar(root.path(), "Empty").await.unwrap(), None);
        assert!(matches!(
            server_jar(root.path(), "Missing").await,
            Err(SetupError::ServerNotFound(_))
        ));
    }
}
