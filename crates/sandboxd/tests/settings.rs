use sandboxd::Settings;
use std::io::Write;
use tempfile::NamedTempFile;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_full_settings() {
        let yaml = r#"
rootfs: /srv/sbx/rootfs
jobs_dir: /srv/sbx/jobs
defaults:
  timeout_s: 12
  noexec_work: true
  enable_loopback: false
  bind_full_etc: false
"#;
        let mut file = NamedTempFile::new().expect("create temp file");
        write!(file, "{yaml}").expect("write temp file");

        let settings = Settings::load(Some(file.path())).expect("load settings");
        assert_eq!(settings.rootfs.to_str(), Some("/srv/sbx/rootfs"));
        assert_eq!(settings.defaults.timeout_s, 12);
        assert!(settings.defaults.noexec_work);
    }

    #[test]
    fn missing_defaults_block_falls_back_to_builtin_values() {
        let yaml = "rootfs: /srv/sbx/rootfs\njobs_dir: /srv/sbx/jobs\n";
        let mut file = NamedTempFile::new().expect("create temp file");
        write!(file, "{yaml}").expect("write temp file");

        let settings = Settings::load(Some(file.path())).expect("load settings");
        assert_eq!(settings.defaults.timeout_s, 8);
        assert!(!settings.defaults.enable_loopback);
    }

    #[test]
    fn missing_rootfs_key_is_rejected() {
        let yaml = "jobs_dir: /srv/sbx/jobs\n";
        let mut file = NamedTempFile::new().expect("create temp file");
        write!(file, "{yaml}").expect("write temp file");

        let err = Settings::load(Some(file.path())).expect_err("empty rootfs must fail validation");
        assert!(err.to_string().contains("rootfs"));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let mut file = NamedTempFile::new().expect("create temp file");
        write!(file, "rootfs: [this is not, a mapping\n").expect("write temp file");

        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = Settings::load(Some(std::path::Path::new("/nonexistent/sandbox.yaml")))
            .expect_err("missing settings file must fail");
        assert!(err.to_string().contains("failed to read"));
    }
}
