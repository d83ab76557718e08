//! Temporary VistA-shaped source trees

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use vista_graph::config::MIN_BATCH_SIZE;
use vista_graph::pipeline::{discover_dumps, discover_routines};
use vista_graph::{EngineConfig, PackageRegistry, PipelineInput};

/// Data dictionary for PATIENT (2), its ALIAS multiple (2.01), WARD
/// LOCATION (42) and a field-less HOSPITAL LOCATION (44). PROVIDER points at
/// a file that is not in the dump.
pub const DD_DUMP: &str = r#"GT.M MUPIP EXTRACT
ZWR
^DD(2,0)="PATIENT^DPT^.3^7"
^DD(2,0,"NM","PATIENT")=""
^DD(2,.01,0)="NAME^RF^^0;1^K:$L(X)>30 X"
^DD(2,.01,1,0)="^.1"
^DD(2,.01,1,1,0)="2^B"
^DD(2,.01,1,1,1)="S ^DPT(""B"",$E(X,1,30),DA)="""""
^DD(2,.01,1,1,2)="K ^DPT(""B"",$E(X,1,30),DA)"
^DD(2,.01,3)="Answer must be 3-30 characters in length."
^DD(2,.02,0)="SEX^RS^M:MALE;F:FEMALE;^0;2^Q"
^DD(2,.104,0)="PROVIDER^P200'^VA(200,^.104;1^Q"
^DD(2,.3,0)="WARD LOCATION^P42'^DIC(42,^.1;1^Q"
^DD(2,1,0)="ALIAS^2.01A^^.01;0"
^DD(2.01,0)="ALIAS SUB-FIELD^^.01^1"
^DD(2.01,0,"UP")=2
^DD(2.01,.01,0)="ALIAS^MF^^0;1^K:$L(X)>30 X"
^DD(42,0)="WARD LOCATION^DIC(42,^.01^1"
^DD(42,.01,0)="NAME^RF^^0;1^K:$L(X)>30 X"
^DD(44,0)="HOSPITAL LOCATION^SC"
"#;

/// File registry roots
pub const DIC_DUMP: &str = r#"GT.M MUPIP EXTRACT
ZWR
^DIC(2,0)="PATIENT^2I^1^1"
^DIC(2,0,"GL")="^DPT("
^DIC(42,0)="WARD LOCATION^42^1^1"
^DIC(42,0,"GL")="^DIC(42,"
"#;

pub const DG10: &str = "DG10 ;ALB/MRL - LOAD/EDIT PATIENT DATA
 ;;5.3;Registration;**32**;Aug 13, 1993
EN ;entry point
 S DFN=$O(^DPT(\"B\",\"X\",0))
 D PROCESS^DG10(DFN),MISSING^DG10
 D ^DGREG,NOPE^ZZZ
 S NAME=$$NAME(DFN)
 I DFN G EXIT
PROCESS(DFN) ;
 Q:'$D(^DPT(DFN,0))
 S ^TMP($J,DFN)=1
NAME(DFN) ;
 Q $P($G(^DPT(DFN,0)),U)
EXIT Q
";

pub const DGREG: &str = "DGREG ;registration
 D EN^DG10,EN+1^DG10
 Q
";

/// No label on the first line; survives as a needs-review routine
pub const ZZBAD: &str = " S X=1
 Q
";

pub const REGISTRY: &str = r#"
[[package]]
name = "REGISTRATION"
prefixes = ["DG"]
files = ["2"]
file_ranges = [{ low = "40", high = "45.9" }]

[[package]]
name = "SCHEDULING"
prefixes = ["SD"]
"#;

/// Builder for a temporary source tree
pub struct VistaFixture {
    dir: TempDir,
}

impl VistaFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Dumps, three routines and a registry
    pub fn standard() -> Self {
        let fixture = Self::new();
        fixture
            .add_file("dumps/DD.zwr", DD_DUMP)
            .add_file("dumps/DIC.zwr", DIC_DUMP)
            .add_file("routines/Registration/DG10.m", DG10)
            .add_file("routines/Registration/DGREG.m", DGREG)
            .add_file("routines/Scratch/ZZBAD.m", ZZBAD)
            .add_file("packages.toml", REGISTRY);
        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    pub fn dumps_dir(&self) -> PathBuf {
        self.path().join("dumps")
    }

    pub fn routines_dir(&self) -> PathBuf {
        self.path().join("routines")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.path().join("packages.toml")
    }

    pub fn store_path(&self) -> PathBuf {
        self.path().join("graph").join("vista-graph.db")
    }

    /// Pipeline input discovered from the tree
    pub fn input(&self) -> PipelineInput {
        PipelineInput {
            registry: PackageRegistry::load(&self.registry_path()).expect("registry"),
            dumps: discover_dumps(&self.dumps_dir()).expect("dumps"),
            routines: discover_routines(&self.routines_dir(), "m").expect("routines"),
        }
    }

    /// Smallest accepted batches and fast retries
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.extraction.workers = 2;
        config.merge.batch_size = MIN_BATCH_SIZE;
        config.merge.write_slots = 2;
        config.merge.retry_base_ms = 1;
        config.merge.retry_max_ms = 5;
        config.store.path = self.store_path();
        config
    }
}
