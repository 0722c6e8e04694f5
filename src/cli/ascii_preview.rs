use crate::core::angle::Angle;
use crate::core::face::FaceRegion;
use crate::core::session::SessionStatus;
use crossterm::terminal;
use image::DynamicImage;

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

/// Draws camera frames as text with the session overlay on top.
pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Leave room for the status lines under the picture.
        Self {
            width: width.unwrap_or(term_width.min(DEFAULT_WIDTH)).max(10),
            height: height.unwrap_or(term_height.saturating_sub(8).min(DEFAULT_HEIGHT)).max(5),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn render(&self, image: &DynamicImage, face: Option<&FaceRegion>, status: &SessionStatus) -> String {
        let mut grid = self.image_to_ascii(image);

        if let Some(region) = face {
            self.draw_face_box(&mut grid, region, image.width() as f32, image.height() as f32);
        }

        let prompt = match status.current_angle {
            Some(angle) if !status.progress.missing.is_empty() => angle.prompt(),
            _ => "All angles captured",
        };
        self.overlay_text(&mut grid, prompt, self.width / 2, 0);

        let bar = progress_boxes(&status.captured, &status.progress.missing, status.current_angle);
        self.overlay_text(&mut grid, &bar, self.width / 2, self.height.saturating_sub(1));

        grid_to_string(&grid, self.width)
    }

    /// Status lines shown under the preview.
    pub fn status_lines(&self, status: &SessionStatus) -> Vec<String> {
        let mut lines = Vec::new();

        let angle = status.current_angle.map(|a| a.label()).unwrap_or("-");
        let readiness = if status.ready { "READY" } else { "adjusting" };
        lines.push(format!(
            "Angle: {:<14} {:>3}% ({}/{} required)  [{}]",
            angle, status.progress.percent, status.progress.captured, status.progress.required, readiness
        ));

        match (&status.last_error, &status.last_decision) {
            (Some(error), _) => lines.push(format!("Error: {}", error.message)),
            (None, Some(decision)) if !decision.accepted() => {
                lines.push(format!("Hint: {}", decision.hints().join("; ")));
            }
            _ => lines.push(String::new()),
        }

        let capture_key = if status.auto_capture { "auto" } else { "c/space capture" };
        lines.push(format!(
            "{} | r retake | R retake all | n/p angle | o camera | s submit | Esc abort",
            capture_key
        ));
        lines
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let ramp: Vec<char> = ASCII_RAMP.chars().collect();

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();
        if img_width == 0 || img_height == 0 {
            return grid;
        }

        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;
                let brightness = gray.get_pixel(img_x.min(img_width - 1), img_y.min(img_height - 1))[0];
                *cell = ramp[(brightness as usize * (ramp.len() - 1)) / 255];
            }
        }
        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }
        let chars: Vec<char> = text.chars().collect();
        let start_x = center_x.saturating_sub(chars.len() / 2);
        for (i, ch) in chars.into_iter().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    fn draw_face_box(&self, grid: &mut [Vec<char>], region: &FaceRegion, img_width: f32, img_height: f32) {
        let scale_x = |v: u32| ((v as f32 / img_width) * self.width as f32) as usize;
        let scale_y = |v: u32| ((v as f32 / img_height) * self.height as f32) as usize;

        let x1 = scale_x(region.x).min(self.width - 1);
        let x2 = scale_x(region.x + region.width).min(self.width - 1);
        let y1 = scale_y(region.y).min(self.height - 1);
        let y2 = scale_y(region.y + region.height).min(self.height - 1);
        if x2 <= x1 + 1 || y2 <= y1 + 1 {
            return;
        }

        for x in x1 + 1..x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in grid.iter_mut().take(y2).skip(y1 + 1) {
            row[x1] = '│';
            row[x2] = '│';
        }
        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';
    }
}

/// One box per session angle: filled when captured, brackets around the current one.
pub fn progress_boxes(captured: &[Angle], missing: &[Angle], current: Option<Angle>) -> String {
    let mut angles: Vec<Angle> = captured.iter().chain(missing.iter()).copied().collect();
    angles.sort();
    angles
        .iter()
        .map(|angle| {
            let mark = if captured.contains(angle) { '■' } else { '□' };
            if Some(*angle) == current {
                format!("[{}]", mark)
            } else {
                format!(" {} ", mark)
            }
        })
        .collect()
}

fn grid_to_string(grid: &[Vec<char>], width: usize) -> String {
    grid.iter()
        .map(|row| row.iter().take(width).collect::<String>())
        .collect::<Vec<_>>()
        .join("\r\n")
}
