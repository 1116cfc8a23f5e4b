//! Locale minimization against a configured allow-list.

use std::fs;

use super::{plural, Stage, StageContext};
use crate::exec::CommandSpec;
use crate::error::Result;

const LOCALE_GEN: &str = "/etc/locale.gen";
const SUPPORTED: &str = "/usr/share/i18n/SUPPORTED";
const LOCALE_DIR: &str = "/usr/share/locale";
const LOCALE_ALIAS: &str = "locale.alias";

/// Allow-list of locale codes such as `en`, `en_US` or `C`.
#[derive(Debug, Clone, Copy)]
pub struct AllowList<'a> {
    keep: &'a [String],
}

impl<'a> AllowList<'a> {
    pub fn new(keep: &'a [String]) -> Self {
        Self { keep }
    }

    pub fn allows(&self, code: &str) -> bool {
        self.keep.iter().any(|k| k == code)
    }

    /// Language parts of the kept codes, without `C`/`POSIX`.
    pub fn languages(&self) -> Vec<&'a str> {
        let mut languages: Vec<&str> = Vec::new();
        for code in self.keep {
            let language = code.split('_').next().unwrap_or(code);
            if matches!(language, "C" | "POSIX") || languages.contains(&language) {
                continue;
            }
            languages.push(language);
        }
        languages
    }

    /// Whether any kept code belongs to `language` (`en_US` keeps `en`).
    pub fn keeps_language(&self, language: &str) -> bool {
        self.languages().contains(&language)
    }
}

/// Locale code of a `SUPPORTED`/`locale.gen` line: the part before `.`, `@`
/// or whitespace. Blank lines and comments have none.
pub fn locale_code(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    line.split(|c: char| c == '.' || c == '@' || c.is_whitespace())
        .next()
        .filter(|code| !code.is_empty())
}

/// Build `/etc/locale.gen` from the supported-locales master list.
pub fn render_locale_gen(supported: &str, allow: AllowList<'_>) -> String {
    let mut out = format!("# Generated by vm-sweeper from {}\n", SUPPORTED);
    for line in supported.lines() {
        if locale_code(line).is_some_and(|code| allow.allows(code)) {
            out.push_str(line.trim());
            out.push('\n');
        }
    }
    out
}

/// Language of an Ubuntu language pack (`language-pack-gnome-de-base` is `de`).
pub fn language_pack_language(package: &str) -> Option<&str> {
    let rest = package.strip_prefix("language-pack-")?;
    let rest = rest
        .strip_prefix("gnome-")
        .or_else(|| rest.strip_prefix("kde-"))
        .unwrap_or(rest);
    rest.split('-').next().filter(|l| !l.is_empty())
}

pub struct LocaleStage;

impl LocaleStage {
    fn regenerate_debian(&self, ctx: &StageContext<'_>, allow: AllowList<'_>) {
        let console = ctx.console();
        let supported = match fs::read_to_string(ctx.paths.resolve(SUPPORTED)) {
            Ok(contents) => contents,
            Err(e) => {
                console.warn(&format!("Cannot read {} ({}); locale data left as is", SUPPORTED, e));
                return;
            }
        };

        let locale_gen = ctx.paths.resolve(LOCALE_GEN);
        let rendered = render_locale_gen(&supported, allow);
        if fs::read_to_string(&locale_gen).ok().as_deref() == Some(rendered.as_str()) {
            tracing::debug!("{} already minimal", LOCALE_GEN);
            return;
        }

        ctx.exec.backup_file(&locale_gen);
        ctx.exec.write_file(&locale_gen, &rendered);
        if ctx.exec.has_program("locale-gen") {
            ctx.exec.run(&CommandSpec::new("locale-gen"));
        }
    }

    fn remove_language_packs(&self, ctx: &StageContext<'_>, allow: AllowList<'_>) {
        let unwanted: Vec<String> = ctx
            .backend
            .list_installed(ctx.exec, "language-pack-*")
            .into_iter()
            .filter(|p| language_pack_language(p).is_some_and(|l| !allow.keeps_language(l)))
            .collect();

        if !unwanted.is_empty() {
            ctx.console().info(&format!(
                "Removing {} language pack{}",
                unwanted.len(),
                plural(unwanted.len())
            ));
            ctx.backend.purge(ctx.exec, &unwanted);
        }
    }

    /// Removing sub-packages and reinstalling glibc-common avoids a full
    /// regeneration, which can exhaust memory on small hosts.
    fn remove_langpacks_rpm(&self, ctx: &StageContext<'_>, allow: AllowList<'_>) {
        let mut removed = false;

        if ctx.backend.is_installed(ctx.exec, "glibc-all-langpacks") {
            let wanted: Vec<String> = allow
                .languages()
                .iter()
                .map(|l| format!("glibc-langpack-{}", l))
                .collect();
            ctx.backend.install(ctx.exec, &wanted);
            ctx.backend
                .remove(ctx.exec, &["glibc-all-langpacks".to_string()]);
            removed = true;
        }

        let unwanted: Vec<String> = ctx
            .backend
            .list_installed(ctx.exec, "glibc-langpack-*")
            .into_iter()
            .filter(|p| {
                p.strip_prefix("glibc-langpack-")
                    .is_some_and(|l| !allow.keeps_language(l))
            })
            .collect();
        if !unwanted.is_empty() {
            ctx.backend.remove(ctx.exec, &unwanted);
            removed = true;
        }

        if removed {
            ctx.backend
                .reinstall(ctx.exec, &["glibc-common".to_string()]);
        }
    }

    fn prune_locale_dirs(&self, ctx: &StageContext<'_>, allow: AllowList<'_>) -> usize {
        let entries = match ctx.paths.list_dir(LOCALE_DIR) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list {}: {}", LOCALE_DIR, e);
                return 0;
            }
        };

        let mut pruned = 0;
        for entry in entries {
            let name = entry.file_name().unwrap_or_default().to_string_lossy();
            if name == LOCALE_ALIAS || allow.allows(&name) || !entry.is_dir() {
                continue;
            }
            if !ctx.exec.remove_path(&entry).is_failed() {
                pruned += 1;
            }
        }
        pruned
    }
}

impl Stage for LocaleStage {
    fn id(&self) -> &'static str {
        "locale"
    }

    fn title(&self) -> &'static str {
        "Locale minimization"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<()> {
        let allow = AllowList::new(&ctx.config.locale.keep);
        ctx.console()
            .info(&format!("Keeping locales: {}", ctx.config.locale.keep.join(", ")));

        if ctx.profile.is_debian_like() {
            self.regenerate_debian(ctx, allow);
            self.remove_language_packs(ctx, allow);
        } else {
            self.remove_langpacks_rpm(ctx, allow);
        }

        let pruned = self.prune_locale_dirs(ctx, allow);
        if pruned > 0 {
            ctx.console().success(&format!(
                "Pruned {} locale director{}",
                pruned,
                if pruned == 1 { "y" } else { "ies" }
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::RecordingRunner;
    use crate::exec::CommandOutput;
    use crate::host::PackageManagerKind;
    use crate::stages::testing::Fixture;

    const SUPPORTED_SAMPLE: &str = "\
C.UTF-8 UTF-8
de_DE.UTF-8 UTF-8
en_GB.UTF-8 UTF-8
en_US.UTF-8 UTF-8
en_US ISO-8859-1
sr_RS@latin UTF-8
";

    fn keep() -> Vec<String> {
        vec!["en".into(), "en_US".into(), "C".into()]
    }

    #[test]
    fn test_locale_code() {
        assert_eq!(locale_code("en_US.UTF-8 UTF-8"), Some("en_US"));
        assert_eq!(locale_code("sr_RS@latin UTF-8"), Some("sr_RS"));
        assert_eq!(locale_code("en_US ISO-8859-1"), Some("en_US"));
        assert_eq!(locale_code("# en_US.UTF-8 UTF-8"), None);
        assert_eq!(locale_code("   "), None);
    }

    #[test]
    fn test_render_locale_gen() {
        let keep = keep();
        let rendered = render_locale_gen(SUPPORTED_SAMPLE, AllowList::new(&keep));
        insta::assert_snapshot!(rendered.trim_end(), @r"
        # Generated by vm-sweeper from /usr/share/i18n/SUPPORTED
        C.UTF-8 UTF-8
        en_US.UTF-8 UTF-8
        en_US ISO-8859-1
        ");
    }

    #[test]
    fn test_language_pack_language() {
        assert_eq!(language_pack_language("language-pack-de"), Some("de"));
        assert_eq!(language_pack_language("language-pack-en-base"), Some("en"));
        assert_eq!(language_pack_language("language-pack-gnome-zh-hans"), Some("zh"));
        assert_eq!(language_pack_language("locales"), None);
    }

    #[test]
    fn test_allow_list_languages() {
        let keep = keep();
        assert_eq!(AllowList::new(&keep).languages(), vec!["en"]);
    }

    #[test]
    fn test_keeps_language_of_territory_codes() {
        let keep = vec!["en_US".to_string(), "C".to_string()];
        let allow = AllowList::new(&keep);
        assert!(allow.keeps_language("en"));
        assert!(!allow.keeps_language("de"));
        assert!(!allow.keeps_language("C"));
    }

    #[test]
    fn test_locale_dirs_outside_allow_list_are_removed() {
        let runner = RecordingRunner::new().with_program("locale-gen");
        let fixture = Fixture::new(PackageManagerKind::Apt, runner, false);
        fixture.write(SUPPORTED, SUPPORTED_SAMPLE);
        fixture.write("/etc/locale.gen", "# everything\nde_DE.UTF-8 UTF-8\n");
        for dir in ["en", "en_US", "en_GB", "de", "fr", "pt_BR"] {
            fixture.mkdir(&format!("/usr/share/locale/{}/LC_MESSAGES", dir));
        }
        fixture.write("/usr/share/locale/locale.alias", "alias");

        LocaleStage.run(&fixture.ctx()).unwrap();

        let mut remaining: Vec<String> = fs::read_dir(fixture.path(LOCALE_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["en", "en_US", "locale.alias"]);

        assert!(fixture.read(LOCALE_GEN).contains("en_US.UTF-8 UTF-8"));
        assert!(!fixture.read(LOCALE_GEN).contains("de_DE"));
        assert!(fixture.runner.called("locale-gen"));
    }

    #[test]
    fn test_second_run_leaves_locale_gen_alone() {
        let fixture = Fixture::new(PackageManagerKind::Apt, RecordingRunner::new(), false);
        fixture.write(SUPPORTED, SUPPORTED_SAMPLE);

        LocaleStage.run(&fixture.ctx()).unwrap();
        let backups = || {
            fs::read_dir(fixture.path("/etc"))
                .unwrap()
                .filter(|e| {
                    e.as_ref()
                        .unwrap()
                        .file_name()
                        .to_string_lossy()
                        .contains(".bak-")
                })
                .count()
        };
        let first = backups();
        LocaleStage.run(&fixture.ctx()).unwrap();

        assert_eq!(backups(), first);
    }

    #[test]
    fn test_unwanted_language_packs_purged() {
        let runner = RecordingRunner::new().respond(
            "'language-pack-*'",
            CommandOutput::ok("ii  language-pack-en\nii  language-pack-de\nii  language-pack-de-base\n"),
        );
        let fixture = Fixture::new(PackageManagerKind::Apt, runner, false);

        LocaleStage.run(&fixture.ctx()).unwrap();

        assert!(fixture
            .runner
            .called("apt-get -y purge language-pack-de language-pack-de-base"));
    }

    #[test]
    fn test_rpm_removes_langpacks_then_reinstalls_glibc_common() {
        let runner = RecordingRunner::new().respond(
            "'glibc-langpack-*'",
            CommandOutput::ok("glibc-langpack-en\nglibc-langpack-de\nglibc-langpack-fr\n"),
        );
        let fixture = Fixture::new(PackageManagerKind::Dnf, runner, false);

        LocaleStage.run(&fixture.ctx()).unwrap();

        let remove = fixture
            .runner
            .position("dnf -y remove glibc-langpack-de glibc-langpack-fr")
            .expect("langpacks removed");
        let reinstall = fixture
            .runner
            .position("dnf -y reinstall glibc-common")
            .expect("glibc-common reinstalled");
        assert!(remove < reinstall);
    }

    #[test]
    fn test_language_pack_of_kept_territory_survives() {
        let runner = RecordingRunner::new().respond(
            "'language-pack-*'",
            CommandOutput::ok(
                "ii  language-pack-en\nii  language-pack-en-base\nii  language-pack-de\n",
            ),
        );
        let mut fixture = Fixture::new(PackageManagerKind::Apt, runner, false);
        fixture.config.locale.keep = vec!["en_US".into(), "C".into()];

        LocaleStage.run(&fixture.ctx()).unwrap();

        assert!(fixture.runner.called("apt-get -y purge language-pack-de"));
        assert!(!fixture
            .runner
            .calls()
            .iter()
            .any(|c| c.contains("purge") && c.contains("language-pack-en")));
    }

    #[test]
    fn test_rpm_keeps_langpack_it_just_installed() {
        let runner = RecordingRunner::new()
            .respond("glibc-all-langpacks", CommandOutput::ok("glibc-all-langpacks\n"))
            .respond(
                "'glibc-langpack-*'",
                CommandOutput::ok("glibc-langpack-en\nglibc-langpack-de\n"),
            );
        let mut fixture = Fixture::new(PackageManagerKind::Dnf, runner, false);
        fixture.config.locale.keep = vec!["en_US".into(), "C".into()];

        LocaleStage.run(&fixture.ctx()).unwrap();

        assert!(fixture.runner.called("dnf -y install glibc-langpack-en"));
        assert!(fixture.runner.called("dnf -y remove glibc-all-langpacks"));
        assert!(fixture.runner.called("dnf -y remove glibc-langpack-de"));
        assert!(!fixture
            .runner
            .calls()
            .iter()
            .any(|c| c.contains("remove") && c.contains("glibc-langpack-en")));
    }
}
