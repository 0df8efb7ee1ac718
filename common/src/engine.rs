use anyhow::{bail, Context, Result};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::task::{Task, TaskPayload};

/// Par clave/valor emitido por la función map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// map(nombre_archivo, contenido) -> pares
pub type MapFn = fn(&str, &str) -> Result<Vec<KeyValue>>;

/// reduce(clave, valores) -> valor final
pub type ReduceFn = fn(&str, &[String]) -> Result<String>;

/// Lógica de usuario que ejecuta el worker.
#[derive(Clone, Copy)]
pub struct App {
    pub name: &'static str,
    pub map: MapFn,
    pub reduce: ReduceFn,
}

/// Apps incluidas en el binario, por nombre.
pub fn app_by_name(name: &str) -> Option<App> {
    match name {
        "wordcount" => Some(crate::wordcount::APP),
        "indexer" => Some(crate::indexer::APP),
        _ => None,
    }
}

/* =========================
   Particionado y nombres de archivos
   ========================= */

/// FNV-1a de 32 bits recortado a 31 bits. Tiene que dar lo mismo en
/// cualquier proceso y cualquier versión del compilador.
pub fn ihash(key: &str) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in key.as_bytes() {
        h ^= u32::from(*b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h & 0x7fff_ffff
}

pub fn partition_for(key: &str, num_reduce: u32) -> u32 {
    ihash(key) % num_reduce
}

pub fn intermediate_file_name(map_index: u32, reduce_index: u32) -> String {
    format!("mr-{}-{}", map_index, reduce_index)
}

pub fn output_file_name(reduce_index: u32) -> String {
    format!("mr-out-{}", reduce_index)
}

fn new_temp_in(dir: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new().prefix(".mr-tmp-").tempfile_in(dir)
}

/// Publica un archivo temporal en su nombre final (rename atómico).
/// Si otro worker ya escribió el mismo archivo, gana el último.
fn publish(writer: BufWriter<NamedTempFile>, dest: &Path) -> Result<()> {
    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.persist(dest)
        .with_context(|| format!("no se pudo publicar {}", dest.display()))?;
    Ok(())
}

fn check_not_abandoned(abandon: &AtomicBool, what: &str) -> Result<()> {
    if abandon.load(Ordering::SeqCst) {
        bail!("{} abandonada por plazo vencido, no se publica salida", what);
    }
    Ok(())
}

/* =========================
   Map
   ========================= */

/// Ejecuta una tarea map:
///   1. Lee `input_path` completo.
///   2. Llama a la función map de la app.
///   3. Reparte cada par en `hash(key) % num_reduce`.
///   4. Escribe "key value" por línea en `work_dir/mr-<map>-<reduce>`.
///
/// Los archivos de destino se abren a medida que aparece una partición.
/// Si `abandon` se activa antes de publicar, no se publica nada.
pub fn run_map(
    app: &App,
    work_dir: &Path,
    map_index: u32,
    input_path: &str,
    num_reduce: u32,
    abandon: &AtomicBool,
) -> Result<Vec<PathBuf>> {
    if num_reduce == 0 {
        bail!("tarea map {} con num_reduce = 0", map_index);
    }

    let contents = fs::read_to_string(input_path)
        .with_context(|| format!("no se pudo leer la entrada {}", input_path))?;

    let pairs = (app.map)(input_path, &contents)
        .with_context(|| format!("la función map falló sobre {}", input_path))?;

    fs::create_dir_all(work_dir)?;

    // Abrimos un writer por partición sólo cuando hace falta
    let mut writers: HashMap<u32, BufWriter<NamedTempFile>> = HashMap::new();

    for kv in pairs {
        let reduce_index = partition_for(&kv.key, num_reduce);
        let writer = match writers.entry(reduce_index) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(BufWriter::new(new_temp_in(work_dir)?))
            }
        };
        writeln!(writer, "{} {}", kv.key, kv.value)?;
    }

    check_not_abandoned(abandon, "map")?;

    let mut written = Vec::with_capacity(writers.len());
    for (reduce_index, writer) in writers {
        let dest = work_dir.join(intermediate_file_name(map_index, reduce_index));
        publish(writer, &dest)?;
        written.push(dest);
    }

    written.sort();
    debug!(
        "map {} escribió {} archivos intermedios",
        map_index,
        written.len()
    );
    Ok(written)
}

/* =========================
   Reduce
   ========================= */

/// Lee los intermedios `mr-<m>-<partition>` para m en 0..num_map y agrupa
/// los valores por clave. Si falta un intermedio es porque ese map no
/// emitió nada para esta partición; por eso `work_dir` tiene que arrancar
/// limpio, un `mr-*` viejo se leería como propio.
pub fn read_partition(
    work_dir: &Path,
    partition: u32,
    num_map: u32,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for map_index in 0..num_map {
        let path = work_dir.join(intermediate_file_name(map_index, partition));
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("no se pudo abrir {}", path.display()))
            }
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once(' ') {
                Some((key, value)) => {
                    grouped
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
                None => warn!("línea inválida en {}: {:?}", path.display(), line),
            }
        }
    }

    Ok(grouped)
}

/// Ejecuta una tarea reduce y escribe `work_dir/mr-out-<partition>`,
/// una línea "key valor" por clave, ordenadas por clave.
pub fn run_reduce(
    app: &App,
    work_dir: &Path,
    partition: u32,
    num_map: u32,
    abandon: &AtomicBool,
) -> Result<PathBuf> {
    let grouped = read_partition(work_dir, partition, num_map)?;

    fs::create_dir_all(work_dir)?;
    let mut writer = BufWriter::new(new_temp_in(work_dir)?);

    for (key, values) in &grouped {
        let reduced = (app.reduce)(key, values)
            .with_context(|| format!("la función reduce falló para la clave {}", key))?;
        writeln!(writer, "{} {}", key, reduced)?;
    }

    check_not_abandoned(abandon, "reduce")?;

    let dest = work_dir.join(output_file_name(partition));
    publish(writer, &dest)?;
    Ok(dest)
}

/// Punto de entrada del worker: despacha según el tipo de tarea.
pub fn execute_task(app: &App, work_dir: &Path, task: &Task, abandon: &AtomicBool) -> Result<()> {
    match &task.payload {
        TaskPayload::Map {
            input_path,
            num_reduce,
        } => {
            run_map(
                app,
                work_dir,
                task.meta.ident.index,
                input_path,
                *num_reduce,
                abandon,
            )?;
        }
        TaskPayload::Reduce { partition, num_map } => {
            run_reduce(app, work_dir, *partition, *num_map, abandon)?;
        }
    }
    Ok(())
}
