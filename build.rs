use std::fs;
use std::path::Path;

/// 迁移文件必须是 `NNN_描述.sql`
fn is_migration_file(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".sql") else {
        return false;
    };
    let mut parts = stem.splitn(2, '_');
    let version = parts.next().unwrap_or_default();
    version.len() == 3 && version.chars().all(|c| c.is_ascii_digit()) && parts.next().is_some()
}

fn main() {
    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR 未设置");
    let dest_path = Path::new(&out_dir).join("migrations.rs");

    println!("cargo:rerun-if-changed=migrations");

    let mut names: Vec<String> = fs::read_dir("migrations")
        .map(|dir| {
            dir.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| is_migration_file(name))
                .collect()
        })
        .unwrap_or_default();
    names.sort();

    let entries: Vec<String> = names
        .iter()
        .map(|file_name| {
            format!(
                "    (\"{}\", include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/migrations/{}\"))),",
                file_name.trim_end_matches(".sql"),
                file_name
            )
        })
        .collect();

    let code = format!(
        "/// 内嵌的数据库迁移（按版本号排序）\npub const MIGRATIONS: &[(&str, &str)] = &[\n{}\n];\n",
        entries.join("\n")
    );
    fs::write(&dest_path, code).expect("无法写入 migrations.rs");
}
