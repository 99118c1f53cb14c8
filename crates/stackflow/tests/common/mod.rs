use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const SHOP_MANIFEST: &str = r#"
name: shop
services:
  db:
    image: postgres:${PG_VERSION:-16}
    environment:
      POSTGRES_PASSWORD: ${DB_PASSWORD}
    volumes: [db_data:/var/lib/postgresql/data]
  web:
    image: shop/web:latest
    depends_on: [db]
    ports: ["${WEB_PORT:-8080}:80"]
volumes:
  db_data: {}
x-variables:
  DB_PASSWORD: { type: password, required: true }
  WEB_PORT: { type: port }
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Config pointing at a state directory inside the project
    pub fn write_config(&self, extra: &str) -> PathBuf {
        self.write("stackflow.yml", &format!("environment: test\n{extra}"))
    }

    #[allow(dead_code)]
    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}
