// ============================================================================
// Moodboard application — egui shell over the board state + controllers
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;

use eframe::egui;
use egui::{Color32, Pos2, Rect, Sense, Stroke, Vec2};
use image::{Rgba, RgbaImage};

use crate::board::{BoardElement, BoardState};
use crate::generate::{GenerateError, InpaintClient, validate_board};
use crate::persist::{self, FileStore};
use crate::render::{self, SourceCache};
use crate::settings::AppSettings;
use crate::tools::{self, InteractionController, Tool};

/// Longest edge a freshly dropped element is scaled to, so a drop batch fits
/// the 220 px grid cells.
const DROP_FIT_EDGE: f32 = 200.0;

/// How long a transient status message stays visible, seconds.
const NOTICE_SECONDS: f64 = 6.0;

// ============================================================================
// ASYNC JOB PIPELINE — background work with channel completion
// ============================================================================

/// Result delivered from a background worker (rayon::spawn) to the UI thread.
enum JobResult {
    /// A dropped/picked file was decoded; the element already carries its
    /// grid slot (assigned at request time — completion order cannot change
    /// the layout).
    DropLoaded {
        element: BoardElement,
        pixels: Arc<RgbaImage>,
    },
    /// One file of a drop batch failed. Siblings are unaffected.
    DropFailed { name: String, error: String },
    /// A persisted/imported element's source was resolved for display.
    SourceDecoded {
        src: String,
        result: Result<Arc<RgbaImage>, String>,
    },
    /// PNG export finished.
    ExportFinished {
        path: PathBuf,
        result: Result<(), String>,
    },
    /// Inpaint round-trip finished.
    GenerateFinished(Result<RgbaImage, String>),
}

/// Transient status line shown in the bottom bar.
struct Notice {
    text: String,
    is_error: bool,
    expires_at: f64,
}

/// Bookkeeping for display decodes of element sources. A source is resolved
/// at most once at a time, and one that failed stays blocked — otherwise a
/// dead URL would be fetched again on every repaint.
#[derive(Default)]
struct DecodeTracker {
    pending: HashSet<String>,
    failed: HashSet<String>,
}

impl DecodeTracker {
    /// Claim `src` for decoding. False when it is already in flight or has
    /// failed before.
    fn begin(&mut self, src: &str) -> bool {
        if self.failed.contains(src) || self.pending.contains(src) {
            return false;
        }
        self.pending.insert(src.to_string());
        true
    }

    fn finish_ok(&mut self, src: &str) {
        self.pending.remove(src);
    }

    fn finish_err(&mut self, src: &str) {
        self.pending.remove(src);
        self.failed.insert(src.to_string());
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Keep only the failure entries whose source is still on the board.
    fn retain_failures(&mut self, live: impl Fn(&str) -> bool) {
        self.failed.retain(|src| live(src));
    }

    /// Forget all failures (explicit user retry, e.g. re-import).
    fn reset_failures(&mut self) {
        self.failed.clear();
    }
}

pub struct BoardApp {
    state: BoardState,
    controller: InteractionController,
    settings: AppSettings,

    // Inpaint client — rebuilt lazily when the endpoint setting changes.
    client: Arc<InpaintClient>,
    client_endpoint: String,

    // Async job pipeline
    job_sender: mpsc::Sender<JobResult>,
    job_receiver: mpsc::Receiver<JobResult>,
    /// Dropped/picked files still decoding; reserves their grid slots.
    queued_drops: usize,
    /// Display-decode bookkeeping: in-flight sources plus ones that already
    /// failed, so a dead URL is fetched once, not once per frame.
    decodes: DecodeTracker,
    /// True while an export job runs.
    exporting: bool,
    /// True while a generation job runs (UI disable; the adapter holds the
    /// real guard).
    generating: bool,

    // Display caches
    /// Decoded pixels by `src`.
    decoded: HashMap<String, Arc<RgbaImage>>,
    /// GPU textures by element id, tagged with the src they were built from.
    textures: HashMap<String, (String, egui::TextureHandle)>,

    // Generation panel
    prompt: String,
    negative_prompt: String,
    generated: Option<Arc<RgbaImage>>,
    generated_texture: Option<egui::TextureHandle>,

    notices: Vec<Notice>,
}

impl BoardApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let settings = AppSettings::load();
        let state = BoardState::new(Box::new(FileStore::default()));
        crate::log_info!("board loaded with {} element(s)", state.len());

        let (job_sender, job_receiver) = mpsc::channel();
        let client = Arc::new(InpaintClient::new(settings.inpaint_endpoint.clone()));
        let client_endpoint = settings.inpaint_endpoint.clone();

        Self {
            state,
            controller: InteractionController::new(),
            settings,
            client,
            client_endpoint,
            job_sender,
            job_receiver,
            queued_drops: 0,
            decodes: DecodeTracker::default(),
            exporting: false,
            generating: false,
            decoded: HashMap::new(),
            textures: HashMap::new(),
            prompt: String::new(),
            negative_prompt: String::new(),
            generated: None,
            generated_texture: None,
            notices: Vec::new(),
        }
    }

    fn notice(&mut self, ctx: &egui::Context, text: impl Into<String>, is_error: bool) {
        let text = text.into();
        if is_error {
            crate::log_err!("{}", text);
        } else {
            crate::log_info!("{}", text);
        }
        self.notices.push(Notice {
            text,
            is_error,
            expires_at: ctx.input(|i| i.time) + NOTICE_SECONDS,
        });
    }

    // ------------------------------------------------------------------
    // Background job dispatch
    // ------------------------------------------------------------------

    /// Queue decode jobs for a batch of image files. Grid slots are assigned
    /// here, in request order, before any decode completes.
    fn queue_image_files(&mut self, paths: Vec<PathBuf>) {
        let accepted: Vec<PathBuf> = paths
            .into_iter()
            .filter(|p| tools::is_image_file(&p.to_string_lossy()))
            .collect();

        for path in accepted {
            let slot = tools::drop_grid_slot(self.state.len() + self.queued_drops);
            self.queued_drops += 1;
            let sender = self.job_sender.clone();
            rayon::spawn(move || {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string_lossy().into_owned());
                let result = std::fs::read(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| {
                        image::load_from_memory(&bytes).map_err(|e| e.to_string())
                    });
                let msg = match result {
                    Ok(img) => {
                        let pixels = Arc::new(img.into_rgba8());
                        let (w, h) = fit_size(pixels.width(), pixels.height());
                        let element = BoardElement::new(
                            path.to_string_lossy().into_owned(),
                            slot.0,
                            slot.1,
                            w,
                            h,
                        );
                        JobResult::DropLoaded { element, pixels }
                    }
                    Err(error) => JobResult::DropFailed { name, error },
                };
                let _ = sender.send(msg);
            });
        }
    }

    /// Resolve a persisted/imported element source off the UI thread. A
    /// source that already failed is not retried until it leaves the board
    /// or an import resets the tracker.
    fn queue_source_decode(&mut self, src: String) {
        if !self.decodes.begin(&src) {
            return;
        }
        let sender = self.job_sender.clone();
        rayon::spawn(move || {
            let result = SourceCache::default()
                .resolve(&src)
                .map_err(|e| e.to_string());
            let _ = sender.send(JobResult::SourceDecoded { src, result });
        });
    }

    /// Rasterize the board and write a PNG to `path` in the background.
    fn queue_export(&mut self, path: PathBuf) {
        self.exporting = true;
        let elements = self.state.elements().to_vec();
        let mut cache = SourceCache::default();
        for (src, pixels) in &self.decoded {
            cache.put(src, Arc::clone(pixels));
        }
        let (w, h) = (self.settings.board_width, self.settings.board_height);
        let background = Rgba(self.settings.background);
        let sender = self.job_sender.clone();
        rayon::spawn(move || {
            let result = render::compose(&elements, &mut cache, w, h, background)
                .map_err(|e| e.to_string())
                .and_then(|img| render::encode_png(&img).map_err(|e| e.to_string()))
                .and_then(|png| std::fs::write(&path, png).map_err(|e| e.to_string()));
            let _ = sender.send(JobResult::ExportFinished { path, result });
        });
    }

    /// Rasterize the board and submit it to the inpaint service.
    fn queue_generate(&mut self) {
        self.generating = true;
        let elements = self.state.elements().to_vec();
        let mut cache = SourceCache::default();
        for (src, pixels) in &self.decoded {
            cache.put(src, Arc::clone(pixels));
        }
        let (w, h) = (self.settings.board_width, self.settings.board_height);
        let background = Rgba(self.settings.background);
        let client = Arc::clone(&self.client);
        let prompt = self.prompt.clone();
        let negative = self.negative_prompt.clone();
        let internal_model = self.settings.internal_model;
        let sender = self.job_sender.clone();
        rayon::spawn(move || {
            let result = render::compose(&elements, &mut cache, w, h, background)
                .map_err(|e| e.to_string())
                .and_then(|img| render::encode_png(&img).map_err(|e| e.to_string()))
                .and_then(|png| {
                    client
                        .generate(&png, &prompt, &negative, internal_model)
                        .map_err(|e| e.to_string())
                });
            let _ = sender.send(JobResult::GenerateFinished(result));
        });
    }

    fn poll_jobs(&mut self, ctx: &egui::Context) {
        while let Ok(result) = self.job_receiver.try_recv() {
            match result {
                JobResult::DropLoaded { element, pixels } => {
                    self.queued_drops = self.queued_drops.saturating_sub(1);
                    self.decoded.insert(element.src.clone(), pixels);
                    self.state.add(element);
                }
                JobResult::DropFailed { name, error } => {
                    // Skip the file; the rest of the batch is unaffected.
                    self.queued_drops = self.queued_drops.saturating_sub(1);
                    self.notice(ctx, format!("Could not load {}: {}", name, error), true);
                }
                JobResult::SourceDecoded { src, result } => match result {
                    Ok(pixels) => {
                        self.decodes.finish_ok(&src);
                        self.decoded.insert(src, pixels);
                    }
                    Err(e) => {
                        // Remembered as failed — no automatic retry.
                        self.decodes.finish_err(&src);
                        self.notice(ctx, format!("Could not load image: {}", e), true);
                    }
                },
                JobResult::ExportFinished { path, result } => {
                    self.exporting = false;
                    match result {
                        Ok(()) => {
                            self.notice(ctx, format!("Exported {}", path.display()), false);
                        }
                        Err(e) => self.notice(ctx, format!("Export failed: {}", e), true),
                    }
                }
                JobResult::GenerateFinished(result) => {
                    self.generating = false;
                    match result {
                        Ok(pixels) => {
                            self.generated = Some(Arc::new(pixels));
                            self.generated_texture = None;
                            self.notice(ctx, "Inspiration ready", false);
                        }
                        Err(e) => self.notice(ctx, format!("Generation failed: {}", e), true),
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Toolbar actions
    // ------------------------------------------------------------------

    fn pick_and_add_images(&mut self) {
        let files = rfd::FileDialog::new()
            .add_filter("Images", &["png", "jpg", "jpeg", "webp", "bmp"])
            .pick_files();
        if let Some(paths) = files {
            self.queue_image_files(paths);
        }
    }

    fn export_png(&mut self, ctx: &egui::Context) {
        if self.exporting {
            return;
        }
        if self.state.is_empty() {
            self.notice(ctx, "Nothing to export — the canvas is empty", true);
            return;
        }
        let picked = rfd::FileDialog::new()
            .add_filter("PNG image", &["png"])
            .set_file_name(persist::export_file_name("canvas-export", "png"))
            .save_file();
        if let Some(path) = picked {
            self.queue_export(path);
        }
    }

    fn export_json(&mut self, ctx: &egui::Context) {
        let picked = rfd::FileDialog::new()
            .add_filter("Board document", &["json"])
            .set_file_name(persist::export_file_name("canvas-state", "json"))
            .save_file();
        let Some(path) = picked else { return };
        let result = persist::export_document(self.state.elements())
            .map_err(|e| e.to_string())
            .and_then(|doc| std::fs::write(&path, doc).map_err(|e| e.to_string()));
        match result {
            Ok(()) => self.notice(ctx, format!("Saved {}", path.display()), false),
            Err(e) => self.notice(ctx, format!("Export failed: {}", e), true),
        }
    }

    fn import_json(&mut self, ctx: &egui::Context) {
        let picked = rfd::FileDialog::new()
            .add_filter("Board document", &["json"])
            .pick_file();
        let Some(path) = picked else { return };
        let result = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|json| persist::import_document(&json).map_err(|e| e.to_string()));
        match result {
            Ok(elements) => {
                // Atomic replace: validation passed for the whole document.
                self.notice(ctx, format!("Imported {} element(s)", elements.len()), false);
                self.state.replace_all(elements);
                self.textures.clear();
                // An import is an explicit user retry for dead sources.
                self.decodes.reset_failures();
            }
            Err(e) => {
                // Rejected wholesale; current board untouched.
                self.notice(ctx, format!("Import rejected: {}", e), true);
            }
        }
    }

    fn trigger_generate(&mut self, ctx: &egui::Context) {
        if let Err(e) = validate_board(self.state.elements()) {
            self.notice(ctx, e.to_string(), true);
            return;
        }
        if self.generating || self.client.is_in_flight() {
            self.notice(ctx, GenerateError::Busy.to_string(), true);
            return;
        }
        // Endpoint setting may have changed since the client was built.
        if self.client_endpoint != self.settings.inpaint_endpoint {
            self.client = Arc::new(InpaintClient::new(self.settings.inpaint_endpoint.clone()));
            self.client_endpoint = self.settings.inpaint_endpoint.clone();
        }
        self.queue_generate();
    }

    fn save_generated(&mut self, ctx: &egui::Context) {
        let Some(pixels) = self.generated.clone() else {
            return;
        };
        let picked = rfd::FileDialog::new()
            .add_filter("PNG image", &["png"])
            .set_file_name(persist::export_file_name("inspiration", "png"))
            .save_file();
        let Some(path) = picked else { return };
        let result = render::encode_png(&pixels)
            .map_err(|e| e.to_string())
            .and_then(|png| std::fs::write(&path, png).map_err(|e| e.to_string()));
        match result {
            Ok(()) => self.notice(ctx, format!("Saved {}", path.display()), false),
            Err(e) => self.notice(ctx, format!("Save failed: {}", e), true),
        }
    }

    // ------------------------------------------------------------------
    // Canvas
    // ------------------------------------------------------------------

    fn show_canvas(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        // At least the board surface; grows to fill the viewport so there is
        // no dead border inside the scroll area.
        let size = Vec2::new(
            self.settings.board_width as f32,
            self.settings.board_height as f32,
        )
        .max(ui.available_size());
        let (response, painter) = ui.allocate_painter(size, Sense::click_and_drag());
        let canvas_rect = response.rect;

        painter.rect_filled(
            canvas_rect,
            0.0,
            Color32::from_rgba_unmultiplied(
                self.settings.background[0],
                self.settings.background[1],
                self.settings.background[2],
                self.settings.background[3],
            ),
        );

        // -- Pointer events → interaction controller -----------------------
        let to_board = |pos: Pos2| (pos.x - canvas_rect.min.x, pos.y - canvas_rect.min.y);

        if response.drag_started()
            && let Some(pos) = response.interact_pointer_pos()
        {
            self.controller.pointer_down(&mut self.state, to_board(pos));
        }
        if self.controller.is_dragging()
            && let Some(pos) = ctx.input(|i| i.pointer.interact_pos())
        {
            self.controller.pointer_move(&mut self.state, to_board(pos));
        }
        // Release is taken from global input, not the canvas response, so a
        // drag ends even when the pointer leaves the window.
        if ctx.input(|i| i.pointer.any_released()) {
            self.controller.pointer_up();
        }

        // -- Draw elements: insertion order, selected on top ---------------
        let mut missing: Vec<String> = Vec::new();
        let ordered: Vec<BoardElement> = {
            let mut v: Vec<BoardElement> = self
                .state
                .elements()
                .iter()
                .filter(|e| !e.selected)
                .cloned()
                .collect();
            v.extend(self.state.elements().iter().filter(|e| e.selected).cloned());
            v
        };
        for el in &ordered {
            if !self.ensure_texture(ctx, el) {
                missing.push(el.src.clone());
            }
            self.draw_element(&painter, canvas_rect, el, ui.visuals().selection.stroke.color);
        }
        for src in missing {
            self.queue_source_decode(src);
        }
    }

    /// Make sure the element has an up-to-date texture. Returns false when
    /// the source pixels are not decoded yet.
    fn ensure_texture(&mut self, ctx: &egui::Context, el: &BoardElement) -> bool {
        if let Some((src, _)) = self.textures.get(&el.id)
            && *src == el.src
        {
            return true;
        }
        let Some(pixels) = self.decoded.get(&el.src) else {
            return false;
        };
        let color_image = egui::ColorImage::from_rgba_unmultiplied(
            [pixels.width() as usize, pixels.height() as usize],
            pixels.as_raw(),
        );
        let handle = ctx.load_texture(
            format!("element-{}", el.id),
            color_image,
            egui::TextureOptions::LINEAR,
        );
        self.textures.insert(el.id.clone(), (el.src.clone(), handle));
        true
    }

    /// Draw one element as a textured quad rotated about its center, plus
    /// selection chrome when selected.
    fn draw_element(
        &self,
        painter: &egui::Painter,
        canvas_rect: Rect,
        el: &BoardElement,
        accent: Color32,
    ) {
        let (cx, cy) = el.center();
        let center = Pos2::new(canvas_rect.min.x + cx, canvas_rect.min.y + cy);
        let rad = el.display_rotation().to_radians();
        let (sin, cos) = rad.sin_cos();
        let rotate = |dx: f32, dy: f32| -> Pos2 {
            Pos2::new(
                center.x + dx * cos - dy * sin,
                center.y + dx * sin + dy * cos,
            )
        };
        let hw = el.width / 2.0;
        let hh = el.height / 2.0;
        // Corners: TL, TR, BL, BR
        let s_tl = rotate(-hw, -hh);
        let s_tr = rotate(hw, -hh);
        let s_bl = rotate(-hw, hh);
        let s_br = rotate(hw, hh);

        match self.textures.get(&el.id) {
            Some((_, tex)) => {
                // Textured quad (two triangles) with UV corners.
                let white = Color32::WHITE;
                let mut mesh = egui::Mesh::with_texture(tex.id());
                mesh.vertices.push(egui::epaint::Vertex { pos: s_tl, uv: Pos2::new(0.0, 0.0), color: white });
                mesh.vertices.push(egui::epaint::Vertex { pos: s_tr, uv: Pos2::new(1.0, 0.0), color: white });
                mesh.vertices.push(egui::epaint::Vertex { pos: s_bl, uv: Pos2::new(0.0, 1.0), color: white });
                mesh.vertices.push(egui::epaint::Vertex { pos: s_br, uv: Pos2::new(1.0, 1.0), color: white });
                mesh.indices.extend_from_slice(&[0, 1, 2, 1, 3, 2]);
                painter.add(egui::Shape::mesh(mesh));
            }
            None => {
                // Placeholder while the source decodes.
                painter.add(egui::Shape::convex_polygon(
                    vec![s_tl, s_tr, s_br, s_bl],
                    Color32::from_gray(210),
                    Stroke::new(1.0, Color32::from_gray(160)),
                ));
            }
        }

        if el.selected {
            painter.add(egui::Shape::closed_line(
                vec![s_tl, s_tr, s_br, s_bl],
                Stroke::new(2.0, accent),
            ));
            // Resize affordance on the bottom-right corner.
            painter.circle_filled(s_br, 5.0, accent);
        }
    }

    // ------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------

    fn show_toolbar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.horizontal_wrapped(|ui| {
            let move_active = self.controller.active_tool() == Some(Tool::Move);
            if ui.selectable_label(move_active, "Move").clicked() {
                self.controller.toggle_tool(Tool::Move);
            }
            let resize_active = self.controller.active_tool() == Some(Tool::Resize);
            if ui.selectable_label(resize_active, "Resize").clicked() {
                self.controller.toggle_tool(Tool::Resize);
            }
            ui.separator();

            let has_selection = self.state.selected().is_some();
            if ui
                .add_enabled(has_selection, egui::Button::new("Enlarge"))
                .clicked()
            {
                self.controller.enlarge_selected(&mut self.state);
            }
            if ui
                .add_enabled(has_selection, egui::Button::new("Shrink"))
                .clicked()
            {
                self.controller.shrink_selected(&mut self.state);
            }
            if ui
                .add_enabled(has_selection, egui::Button::new("Rotate 90°"))
                .clicked()
            {
                self.controller.rotate_selected(&mut self.state);
            }
            if ui
                .add_enabled(has_selection, egui::Button::new("Delete"))
                .clicked()
                && let Some(sel) = self.state.selected()
            {
                let id = sel.id.clone();
                self.state.remove(&id);
            }
            ui.separator();

            if ui.button("Add images…").clicked() {
                self.pick_and_add_images();
            }
            if ui.button("Clear canvas").clicked() {
                self.state.clear();
                self.textures.clear();
            }
            ui.separator();

            if ui
                .add_enabled(!self.exporting, egui::Button::new("Export PNG…"))
                .clicked()
            {
                self.export_png(ctx);
            }
            if ui.button("Export JSON…").clicked() {
                self.export_json(ctx);
            }
            if ui.button("Import JSON…").clicked() {
                self.import_json(ctx);
            }

            if self.exporting || self.queued_drops > 0 {
                ui.separator();
                ui.spinner();
            }
        });
    }

    fn show_generate_panel(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.heading("Generate inspiration");
        ui.add_space(4.0);

        ui.label("Prompt");
        ui.text_edit_multiline(&mut self.prompt);
        ui.label("Negative prompt");
        ui.text_edit_singleline(&mut self.negative_prompt);
        ui.add_space(4.0);

        let busy = self.generating || self.client.is_in_flight();
        ui.horizontal(|ui| {
            if ui
                .add_enabled(!busy, egui::Button::new("Generate"))
                .clicked()
            {
                self.trigger_generate(ctx);
            }
            if busy {
                ui.spinner();
                ui.label("waiting for the service…");
            }
        });

        if let Some(pixels) = self.generated.clone() {
            ui.separator();
            let texture = self.generated_texture.get_or_insert_with(|| {
                let color_image = egui::ColorImage::from_rgba_unmultiplied(
                    [pixels.width() as usize, pixels.height() as usize],
                    pixels.as_raw(),
                );
                ctx.load_texture("generated", color_image, egui::TextureOptions::LINEAR)
            });
            let avail = ui.available_width();
            let scale = (avail / pixels.width() as f32).min(1.0);
            let size = Vec2::new(
                pixels.width() as f32 * scale,
                pixels.height() as f32 * scale,
            );
            ui.image((texture.id(), size));
            if ui.button("Save image…").clicked() {
                self.save_generated(ctx);
            }
        }

        ui.separator();
        ui.collapsing("Settings", |ui| {
            let mut changed = false;
            ui.label("Inpaint endpoint");
            changed |= ui
                .text_edit_singleline(&mut self.settings.inpaint_endpoint)
                .changed();
            changed |= ui
                .checkbox(&mut self.settings.internal_model, "Use internal model")
                .changed();
            ui.horizontal(|ui| {
                ui.label("Board size");
                changed |= ui
                    .add(egui::DragValue::new(&mut self.settings.board_width).clamp_range(64..=8192))
                    .changed();
                ui.label("×");
                changed |= ui
                    .add(
                        egui::DragValue::new(&mut self.settings.board_height)
                            .clamp_range(64..=8192),
                    )
                    .changed();
            });
            if changed {
                self.settings.save();
            }
        });
    }

    fn show_status_bar(&mut self, ui: &mut egui::Ui, now: f64) {
        self.notices.retain(|n| n.expires_at > now);
        ui.horizontal(|ui| {
            ui.label(format!("{} element(s)", self.state.len()));
            for notice in &self.notices {
                ui.separator();
                let color = if notice.is_error {
                    ui.visuals().error_fg_color
                } else {
                    ui.visuals().text_color()
                };
                ui.colored_label(color, &notice.text);
            }
        });
    }
}

impl eframe::App for BoardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_jobs(ctx);

        // OS drag-and-drop: accepted image files get grid slots in drop order.
        let dropped: Vec<egui::DroppedFile> = ctx.input(|i| i.raw.dropped_files.clone());
        if !dropped.is_empty() {
            let paths: Vec<PathBuf> = dropped.into_iter().filter_map(|f| f.path).collect();
            self.queue_image_files(paths);
        }

        // Delete key removes the selected element.
        if ctx.input(|i| i.key_pressed(egui::Key::Delete))
            && let Some(sel) = self.state.selected()
        {
            let id = sel.id.clone();
            self.state.remove(&id);
        }

        // Drop caches for sources no longer on the board. A failed source
        // that is removed and re-added gets a fresh attempt.
        let live = self.state.elements();
        self.decoded
            .retain(|src, _| live.iter().any(|e| &e.src == src));
        self.decodes
            .retain_failures(|src| live.iter().any(|e| e.src == src));
        self.textures
            .retain(|id, _| live.iter().any(|e| &e.id == id));

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            self.show_toolbar(ui, ctx);
        });
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            let now = ctx.input(|i| i.time);
            self.show_status_bar(ui, now);
        });
        egui::SidePanel::right("generate")
            .min_width(260.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.show_generate_panel(ui, ctx);
                });
            });
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::both().show(ui, |ui| {
                self.show_canvas(ui, ctx);
            });
        });

        // Keep polling while background jobs are in progress.
        if self.queued_drops > 0
            || self.exporting
            || self.generating
            || self.decodes.has_pending()
        {
            ctx.request_repaint();
        }
    }
}

/// Scale natural dimensions to fit the drop grid cell, never upscaling.
fn fit_size(w: u32, h: u32) -> (f32, f32) {
    let (w, h) = (w.max(1) as f32, h.max(1) as f32);
    let scale = (DROP_FIT_EDGE / w.max(h)).min(1.0);
    (w * scale, h * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_decode_is_not_retried_every_frame() {
        let mut tracker = DecodeTracker::default();
        assert!(tracker.begin("http://dead.example/a.png"));
        assert!(!tracker.begin("http://dead.example/a.png")); // in flight

        tracker.finish_err("http://dead.example/a.png");
        assert!(!tracker.has_pending());
        // Every later frame: blocked, no new fetch.
        assert!(!tracker.begin("http://dead.example/a.png"));
        assert!(!tracker.begin("http://dead.example/a.png"));

        // Source leaves the board → the block is lifted.
        tracker.retain_failures(|_| false);
        assert!(tracker.begin("http://dead.example/a.png"));
    }

    #[test]
    fn import_resets_failure_blocks() {
        let mut tracker = DecodeTracker::default();
        assert!(tracker.begin("a.png"));
        tracker.finish_err("a.png");
        assert!(!tracker.begin("a.png"));

        tracker.reset_failures();
        assert!(tracker.begin("a.png"));
        tracker.finish_ok("a.png");
        // A successful decode is cached elsewhere; the tracker only blocks
        // in-flight and failed sources.
        assert!(tracker.begin("a.png"));
    }

    #[test]
    fn drop_fit_preserves_aspect_and_never_upscales() {
        let (w, h) = fit_size(400, 200);
        assert!((w - 200.0).abs() < 1e-3);
        assert!((h - 100.0).abs() < 1e-3);

        let (w, h) = fit_size(120, 80);
        assert_eq!((w, h), (120.0, 80.0));

        let (w, h) = fit_size(0, 0);
        assert_eq!((w, h), (1.0, 1.0));
    }
}
